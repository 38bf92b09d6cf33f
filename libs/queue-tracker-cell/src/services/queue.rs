use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::AppointmentBookingService;
use shared_config::{AppConfig, QueueSettings};
use shared_database::SupabaseClient;
use shared_models::auth::PatientContext;

use super::estimator::{TrackedAppointment, WaitEstimator};
use super::live::LiveQueue;
use super::realtime::RealtimeFeed;
use super::tracker::QueueTracker;
use crate::error::QueueTrackerError;
use crate::models::{QueuePosition, QueueStatus};

pub struct QueueTrackerService {
    supabase: SupabaseClient,
    booking_service: AppointmentBookingService,
    settings: QueueSettings,
}

impl QueueTrackerService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            booking_service: AppointmentBookingService::new(config),
            settings: config.queue.clone(),
        }
    }

    /// A doctor without a queue row yet reads as an inactive queue at token 0.
    pub async fn fetch_queue_status(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<QueueStatus, QueueTrackerError> {
        debug!("Fetching queue status for doctor {}", doctor_id);

        let path = format!("/rest/v1/queue_status?doctor_id=eq.{}&limit=1", doctor_id);
        let rows: Vec<QueueStatus> = self
            .supabase
            .request(Method::GET, &path, Some(auth_token), None)
            .await
            .map_err(|e| QueueTrackerError::StatusUnavailable {
                doctor_id,
                message: e.to_string(),
            })?;

        Ok(rows.into_iter().next().unwrap_or_else(|| {
            warn!("No queue status row for doctor {}", doctor_id);
            QueueStatus::not_started(doctor_id)
        }))
    }

    pub async fn current_position(&self, ctx: &PatientContext) -> Result<QueuePosition, QueueTrackerError> {
        let appointment = self.tracked_appointment(ctx).await?;
        let status = self
            .fetch_queue_status(appointment.doctor_id, &ctx.access_token)
            .await?;

        Ok(WaitEstimator::from_settings(&self.settings).position(&appointment, &status))
    }

    /// Subscribes before the initial read so no change between the two is
    /// lost. `subscribe` only returns once the server has confirmed the join.
    pub async fn start_tracking(
        &self,
        ctx: &PatientContext,
        feed: Arc<dyn RealtimeFeed>,
    ) -> Result<LiveQueue, QueueTrackerError> {
        let appointment = self.tracked_appointment(ctx).await?;

        let subscription = feed.subscribe(appointment.doctor_id, &ctx.access_token).await?;

        let initial = match self
            .fetch_queue_status(appointment.doctor_id, &ctx.access_token)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                subscription.close().await;
                return Err(e);
            }
        };

        info!(
            "Tracking appointment {} (token {}) for patient {}",
            appointment.appointment_id, appointment.token_number, ctx.patient_id
        );

        let tracker = QueueTracker::new(appointment, &self.settings);
        Ok(LiveQueue::start(tracker, initial, subscription))
    }

    async fn tracked_appointment(&self, ctx: &PatientContext) -> Result<TrackedAppointment, QueueTrackerError> {
        let appointment = self
            .booking_service
            .active_appointment(ctx)
            .await?
            .ok_or(QueueTrackerError::NoActiveAppointment)?;

        Ok(TrackedAppointment::from(&appointment))
    }
}
