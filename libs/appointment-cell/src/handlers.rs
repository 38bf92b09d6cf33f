// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{PatientContext, User};
use shared_models::error::AppError;

use crate::models::{Appointment, BookAppointmentRequest, BookingConfirmation};
use crate::services::booking::AppointmentBookingService;
use crate::services::token::SharedTokenSequence;
use crate::services::wizard::{BookingStep, TIME_SLOTS};

fn parse_appointment_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid appointment ID format".to_string()))
}

#[axum::debug_handler]
pub async fn get_time_slots() -> Json<Value> {
    let steps: Vec<Value> = BookingStep::ALL
        .iter()
        .map(|step| json!({ "step": step.number(), "title": step.title() }))
        .collect();

    Json(json!({
        "time_slots": TIME_SLOTS,
        "steps": steps
    }))
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    Extension(sequence): Extension<SharedTokenSequence>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<BookingConfirmation>), AppError> {
    let ctx = PatientContext::new(&user, auth.token())?;

    let booking_service = AppointmentBookingService::with_token_sequence(&state, sequence.0);
    let confirmation = booking_service.book_appointment(&ctx, request).await?;

    Ok((StatusCode::CREATED, Json(confirmation)))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let ctx = PatientContext::new(&user, auth.token())?;

    let booking_service = AppointmentBookingService::new(&state);
    let appointments = booking_service.list_appointments(&ctx).await?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_active_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Appointment>, AppError> {
    let ctx = PatientContext::new(&user, auth.token())?;

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service
        .active_appointment(&ctx)
        .await?
        .ok_or_else(|| AppError::NotFound("No active appointment".to_string()))?;

    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Appointment>, AppError> {
    let appointment_id = parse_appointment_id(&appointment_id)?;
    let ctx = PatientContext::new(&user, auth.token())?;

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.get_appointment(&ctx, appointment_id).await?;

    Ok(Json(appointment))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let appointment_id = parse_appointment_id(&appointment_id)?;
    let ctx = PatientContext::new(&user, auth.token())?;

    let booking_service = AppointmentBookingService::new(&state);
    let appointment = booking_service.cancel_appointment(&ctx, appointment_id).await?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}
