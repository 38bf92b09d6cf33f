use thiserror::Error;
use uuid::Uuid;

use appointment_cell::AppointmentError;
use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum QueueTrackerError {
    #[error("No active appointment")]
    NoActiveAppointment,

    #[error("Failed to load queue status for doctor {doctor_id}: {message}")]
    StatusUnavailable { doctor_id: Uuid, message: String },

    #[error("Realtime connection failed: {0}")]
    RealtimeError(String),

    #[error(transparent)]
    Appointment(#[from] AppointmentError),
}

impl From<QueueTrackerError> for AppError {
    fn from(err: QueueTrackerError) -> Self {
        match err {
            QueueTrackerError::NoActiveAppointment => AppError::NotFound(err.to_string()),
            QueueTrackerError::StatusUnavailable { .. } | QueueTrackerError::RealtimeError(_) => {
                AppError::ExternalService(err.to_string())
            }
            QueueTrackerError::Appointment(e) => e.into(),
        }
    }
}
