use uuid::Uuid;

use appointment_cell::Appointment;
use shared_config::QueueSettings;

use crate::models::{QueuePosition, QueueStatus};

/// The parts of an appointment the queue math needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedAppointment {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub token_number: i32,
}

impl From<&Appointment> for TrackedAppointment {
    fn from(appointment: &Appointment) -> Self {
        Self {
            appointment_id: appointment.id,
            doctor_id: appointment.doctor_id,
            token_number: appointment.token_number,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WaitEstimator {
    minutes_per_patient: u32,
}

impl WaitEstimator {
    pub fn new(minutes_per_patient: u32) -> Self {
        Self { minutes_per_patient }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self::new(settings.minutes_per_patient)
    }

    pub fn tokens_ahead(token_number: i32, current_token: i32) -> i32 {
        token_number.saturating_sub(current_token)
    }

    pub fn estimated_wait_minutes(&self, tokens_ahead: i32) -> u32 {
        tokens_ahead.max(0).unsigned_abs().saturating_mul(self.minutes_per_patient)
    }

    pub fn position(&self, appointment: &TrackedAppointment, status: &QueueStatus) -> QueuePosition {
        let tokens_ahead = Self::tokens_ahead(appointment.token_number, status.current_token);

        QueuePosition {
            appointment_id: appointment.appointment_id,
            doctor_id: appointment.doctor_id,
            token_number: appointment.token_number,
            current_token: status.current_token,
            tokens_ahead,
            estimated_wait_minutes: self.estimated_wait_minutes(tokens_ahead),
            is_your_turn: tokens_ahead <= 0,
            queue_active: status.is_active,
            last_updated: status.last_updated,
        }
    }
}

impl Default for WaitEstimator {
    fn default() -> Self {
        Self::from_settings(&QueueSettings::default())
    }
}
