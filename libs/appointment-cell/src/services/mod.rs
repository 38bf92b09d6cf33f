pub mod booking;
pub mod lifecycle;
pub mod token;
pub mod wizard;

pub use booking::AppointmentBookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use token::{SharedTokenSequence, TokenAssignmentService, TokenSequence, TokenSource};
