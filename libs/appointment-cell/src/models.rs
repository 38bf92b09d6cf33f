// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

use crate::services::token::TokenSource;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub department_id: Option<Uuid>,
    pub hospital_id: Uuid,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub token_number: i32,
    #[serde(default, deserialize_with = "status_or_scheduled")]
    pub status: AppointmentStatus,
    pub estimated_wait_time: Option<i32>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

/// The store leaves `status` null on rows inserted without one.
fn status_or_scheduled<'de, D>(deserializer: D) -> Result<AppointmentStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<AppointmentStatus>::deserialize(deserializer).map(Option::unwrap_or_default)
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

/// Booking form as submitted. Every selection is optional on the wire so a
/// partially filled form gets the same validation message as the UI shows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub hospital_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub appointment_date: Option<NaiveDate>,
    /// Slot label (`"09:30 AM"`) or a 24h time (`"09:30"`, `"09:30:00"`).
    pub time_slot: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingConfirmation {
    pub appointment: Appointment,
    pub token_number: i32,
    pub token_source: TokenSource,
    pub time_slot: String,
    pub message: String,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Please fill all required fields")]
    IncompleteSelection,

    #[error("Invalid time slot: {0}")]
    InvalidTimeSlot(String),

    #[error("Appointment date cannot be in the past")]
    PastDate,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor not available: {0}")]
    DoctorUnavailable(String),

    #[error("Invalid selection: {0}")]
    SelectionMismatch(String),

    #[error("Appointment cannot move from {from} to {to}")]
    InvalidStatusTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Appointment is no longer scheduled")]
    CancelConflict,

    #[error("Could not reserve a unique token after {0} attempts")]
    TokenConflict(u32),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}

impl From<AppointmentError> for AppError {
    fn from(err: AppointmentError) -> Self {
        let message = err.to_string();
        match err {
            AppointmentError::NotFound | AppointmentError::DoctorNotFound => AppError::NotFound(message),
            AppointmentError::IncompleteSelection
            | AppointmentError::InvalidTimeSlot(_)
            | AppointmentError::PastDate
            | AppointmentError::DoctorUnavailable(_)
            | AppointmentError::SelectionMismatch(_) => AppError::ValidationError(message),
            AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::CancelConflict
            | AppointmentError::TokenConflict(_) => AppError::Conflict(message),
            AppointmentError::DatabaseError(msg) => AppError::Database(msg),
            AppointmentError::ExternalServiceError(msg) => AppError::ExternalService(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(status: serde_json::Value) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "patient_id": Uuid::new_v4(),
            "doctor_id": Uuid::new_v4(),
            "department_id": null,
            "hospital_id": Uuid::new_v4(),
            "appointment_date": "2025-03-10",
            "appointment_time": "09:30:00",
            "token_number": 5,
            "status": status,
            "estimated_wait_time": null,
            "notes": null,
            "created_at": null,
            "updated_at": null
        })
    }

    #[test]
    fn test_null_status_reads_as_scheduled() {
        let appointment: Appointment = serde_json::from_value(row(json!(null))).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(appointment.appointment_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
    }

    #[test]
    fn test_status_round_trips_snake_case() {
        let appointment: Appointment = serde_json::from_value(row(json!("in_progress"))).unwrap();
        assert_eq!(appointment.status, AppointmentStatus::InProgress);
        assert_eq!(appointment.status.to_string(), "in_progress");
    }

    #[test]
    fn test_error_mapping() {
        let err: AppError = AppointmentError::IncompleteSelection.into();
        assert_eq!(err.message(), "Please fill all required fields");

        assert!(matches!(AppError::from(AppointmentError::CancelConflict), AppError::Conflict(_)));
        assert!(matches!(AppError::from(AppointmentError::NotFound), AppError::NotFound(_)));
    }
}
