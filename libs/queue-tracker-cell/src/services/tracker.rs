use tracing::debug;

use shared_config::{NearTurnAlertMode, QueueSettings};

use super::estimator::{TrackedAppointment, WaitEstimator};
use crate::models::{NearTurnAlert, QueuePosition, QueueStatus, QueueUpdate};

/// Recomputes a patient's position each time their doctor's queue moves.
#[derive(Debug)]
pub struct QueueTracker {
    appointment: TrackedAppointment,
    estimator: WaitEstimator,
    near_turn_threshold: i32,
    alert_mode: NearTurnAlertMode,
    alerted: bool,
    latest: Option<QueuePosition>,
}

impl QueueTracker {
    pub fn new(appointment: TrackedAppointment, settings: &QueueSettings) -> Self {
        Self {
            appointment,
            estimator: WaitEstimator::from_settings(settings),
            near_turn_threshold: settings.near_turn_threshold,
            alert_mode: settings.near_turn_alert,
            alerted: false,
            latest: None,
        }
    }

    pub fn appointment(&self) -> &TrackedAppointment {
        &self.appointment
    }

    pub fn latest(&self) -> Option<&QueuePosition> {
        self.latest.as_ref()
    }

    /// `None` when the row belongs to another doctor.
    pub fn apply(&mut self, status: &QueueStatus) -> Option<QueueUpdate> {
        if status.doctor_id != self.appointment.doctor_id {
            debug!(
                "Ignoring queue status for doctor {} while tracking doctor {}",
                status.doctor_id, self.appointment.doctor_id
            );
            return None;
        }

        let position = self.estimator.position(&self.appointment, status);
        let alert = self.near_turn_alert(position.tokens_ahead);
        self.latest = Some(position.clone());

        Some(QueueUpdate { position, alert })
    }

    fn near_turn_alert(&mut self, tokens_ahead: i32) -> Option<NearTurnAlert> {
        if tokens_ahead <= 0 || tokens_ahead > self.near_turn_threshold {
            return None;
        }

        if self.alert_mode == NearTurnAlertMode::Once && self.alerted {
            return None;
        }

        self.alerted = true;
        Some(NearTurnAlert::new(tokens_ahead))
    }
}
