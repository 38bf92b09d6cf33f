// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::models::{Doctor, DoctorError};
use doctor_cell::services::DoctorService;
use shared_config::AppConfig;
use shared_database::supabase::{api_error, return_representation, SupabaseClient};
use shared_models::auth::PatientContext;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, BookingConfirmation,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::token::{
    SupabaseAppointmentCounter, TokenAssignmentService, TokenSequence,
};
use crate::services::wizard::{BookingDraft, BookingSelection};

/// Insert attempts before a token collision is reported to the patient.
pub const MAX_BOOKING_ATTEMPTS: u32 = 3;

const PATIENT_ORDER: &str = "order=appointment_date.asc,appointment_time.asc";

pub struct AppointmentBookingService {
    supabase: SupabaseClient,
    doctor_service: DoctorService,
    tokens: TokenAssignmentService,
    lifecycle_service: AppointmentLifecycleService,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_token_sequence(config, None)
    }

    pub fn with_token_sequence(config: &AppConfig, sequence: Option<Arc<dyn TokenSequence>>) -> Self {
        Self::with_token_service(
            config,
            TokenAssignmentService::new(Arc::new(SupabaseAppointmentCounter::new(config)), sequence),
        )
    }

    pub fn with_token_service(config: &AppConfig, tokens: TokenAssignmentService) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            doctor_service: DoctorService::new(config),
            tokens,
            lifecycle_service: AppointmentLifecycleService::new(),
        }
    }

    /// Validates the selection chain, assigns a token and stores the
    /// appointment as `scheduled`.
    pub async fn book_appointment(
        &self,
        ctx: &PatientContext,
        request: BookAppointmentRequest,
    ) -> Result<BookingConfirmation, AppointmentError> {
        let selection = BookingDraft::from(&request).validate()?;
        info!(
            "Booking appointment for patient {} with doctor {} on {} at {}",
            ctx.patient_id, selection.doctor_id, selection.date, selection.slot
        );

        let doctor = self.load_doctor(selection.doctor_id).await?;
        validate_schedule(&doctor, &selection, Utc::now().date_naive())?;

        for attempt in 1..=MAX_BOOKING_ATTEMPTS {
            let assignment = self
                .tokens
                .next_token(selection.doctor_id, selection.date, &ctx.access_token)
                .await;
            debug!(
                "Attempt {}: token {} ({:?}) for doctor {} on {}",
                attempt, assignment.token_number, assignment.source, selection.doctor_id, selection.date
            );

            match self
                .insert_appointment(ctx, &selection, assignment.token_number, request.notes.as_deref())
                .await
            {
                Ok(appointment) => {
                    info!(
                        "Appointment {} booked with token {} ({:?})",
                        appointment.id, appointment.token_number, assignment.source
                    );
                    return Ok(BookingConfirmation {
                        message: confirmation_message(appointment.token_number, selection.date, selection.slot),
                        token_number: appointment.token_number,
                        token_source: assignment.source,
                        time_slot: selection.slot.to_string(),
                        appointment,
                    });
                }
                Err(InsertError::TokenTaken) => {
                    warn!(
                        "Token {} already taken for doctor {} on {}, retrying",
                        assignment.token_number, selection.doctor_id, selection.date
                    );
                }
                Err(InsertError::Failed(e)) => {
                    self.tokens
                        .release(selection.doctor_id, selection.date, assignment)
                        .await;
                    return Err(e);
                }
            }
        }

        Err(AppointmentError::TokenConflict(MAX_BOOKING_ATTEMPTS))
    }

    async fn load_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        self.doctor_service
            .get_doctor(doctor_id)
            .await
            .map_err(|e| match e {
                DoctorError::NotFound => AppointmentError::DoctorNotFound,
                DoctorError::LoadFailed(msg) => AppointmentError::ExternalServiceError(msg),
            })
    }

    async fn insert_appointment(
        &self,
        ctx: &PatientContext,
        selection: &BookingSelection,
        token_number: i32,
        notes: Option<&str>,
    ) -> Result<Appointment, InsertError> {
        let body = json!({
            "patient_id": ctx.patient_id,
            "doctor_id": selection.doctor_id,
            "department_id": selection.department_id,
            "hospital_id": selection.hospital_id,
            "appointment_date": selection.date.format("%Y-%m-%d").to_string(),
            "appointment_time": selection.time.format("%H:%M:%S").to_string(),
            "token_number": token_number,
            "status": AppointmentStatus::Scheduled,
            "notes": notes,
        });

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/appointments",
                Some(&ctx.access_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| match api_error(&e) {
                Some(api_err) if api_err.is_unique_violation() => InsertError::TokenTaken,
                _ => InsertError::Failed(AppointmentError::DatabaseError(e.to_string())),
            })?;

        result.into_iter().next().ok_or_else(|| {
            InsertError::Failed(AppointmentError::DatabaseError(
                "Insert returned no appointment".to_string(),
            ))
        })
    }

    /// The patient's appointments ordered by date, then time.
    pub async fn list_appointments(&self, ctx: &PatientContext) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Fetching appointments for patient {}", ctx.patient_id);

        let path = format!("/rest/v1/appointments?patient_id=eq.{}&{}", ctx.patient_id, PATIENT_ORDER);
        self.supabase
            .request(Method::GET, &path, Some(&ctx.access_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    /// First `scheduled` appointment by date and time, if any.
    pub async fn active_appointment(&self, ctx: &PatientContext) -> Result<Option<Appointment>, AppointmentError> {
        debug!("Fetching active appointment for patient {}", ctx.patient_id);

        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&status=eq.scheduled&{}&limit=1",
            ctx.patient_id, PATIENT_ORDER
        );
        let appointments: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(&ctx.access_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(select_active(appointments))
    }

    pub async fn get_appointment(
        &self,
        ctx: &PatientContext,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&patient_id=eq.{}",
            appointment_id, ctx.patient_id
        );
        let result: Vec<Appointment> = self
            .supabase
            .request(Method::GET, &path, Some(&ctx.access_token), None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        result.into_iter().next().ok_or(AppointmentError::NotFound)
    }

    /// Cancels a still-scheduled appointment. The update only matches while
    /// the row is `scheduled`, so a concurrent staff change surfaces as
    /// `CancelConflict` instead of being overwritten.
    pub async fn cancel_appointment(
        &self,
        ctx: &PatientContext,
        appointment_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self.get_appointment(ctx, appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(current.status, AppointmentStatus::Cancelled)?;
        if !self.lifecycle_service.can_patient_cancel(current.status) {
            return Err(AppointmentError::CancelConflict);
        }

        let path = format!(
            "/rest/v1/appointments?id=eq.{}&patient_id=eq.{}&status=eq.scheduled",
            appointment_id, ctx.patient_id
        );
        let body = json!({
            "status": AppointmentStatus::Cancelled,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let result: Vec<Appointment> = self
            .supabase
            .request_with_headers(
                Method::PATCH,
                &path,
                Some(&ctx.access_token),
                Some(body),
                Some(return_representation()),
            )
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let cancelled = result.into_iter().next().ok_or_else(|| {
            warn!("Appointment {} changed status before it could be cancelled", appointment_id);
            AppointmentError::CancelConflict
        })?;

        info!("Appointment {} cancelled by patient {}", appointment_id, ctx.patient_id);
        Ok(cancelled)
    }
}

enum InsertError {
    TokenTaken,
    Failed(AppointmentError),
}

/// Checks the chosen doctor against the rest of the selection.
pub fn validate_schedule(
    doctor: &Doctor,
    selection: &BookingSelection,
    today: NaiveDate,
) -> Result<(), AppointmentError> {
    if !doctor.is_active() {
        return Err(AppointmentError::DoctorUnavailable(format!(
            "{} is not accepting appointments",
            doctor.name
        )));
    }
    if doctor.hospital_id != selection.hospital_id {
        return Err(AppointmentError::SelectionMismatch(
            "Doctor does not practice at the selected hospital".to_string(),
        ));
    }
    if doctor.department_id != Some(selection.department_id) {
        return Err(AppointmentError::SelectionMismatch(
            "Doctor does not belong to the selected department".to_string(),
        ));
    }
    if selection.date < today {
        return Err(AppointmentError::PastDate);
    }
    if !doctor.works_on(selection.date) {
        return Err(AppointmentError::DoctorUnavailable(format!(
            "{} does not work on {}",
            doctor.name,
            selection.date.format("%A")
        )));
    }
    if !doctor.is_available_at(selection.time) {
        return Err(AppointmentError::DoctorUnavailable(format!(
            "{} is not available at {}",
            doctor.name, selection.slot
        )));
    }
    Ok(())
}

/// Earliest `scheduled` appointment by date, then time.
pub fn select_active(appointments: Vec<Appointment>) -> Option<Appointment> {
    appointments
        .into_iter()
        .filter(Appointment::is_scheduled)
        .min_by_key(|a| (a.appointment_date, a.appointment_time))
}

pub fn confirmation_message(token_number: i32, date: NaiveDate, slot: &str) -> String {
    format!(
        "Token #{} assigned for {} {}{}, {} at {}",
        token_number,
        date.format("%B"),
        date.day(),
        ordinal_suffix(date.day()),
        date.year(),
        slot
    )
}

/// English ordinal suffix: 1st, 2nd, 3rd, 4th, 11th, 12th, 13th, 21st.
fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}
