pub mod channel;
pub mod estimator;
pub mod live;
pub mod queue;
pub mod realtime;
pub mod tracker;

pub use channel::TaskChannel;
pub use estimator::{TrackedAppointment, WaitEstimator};
pub use live::LiveQueue;
pub use queue::QueueTrackerService;
pub use realtime::{QueueSubscription, RealtimeFeed, SupabaseRealtimeFeed};
pub use tracker::QueueTracker;
