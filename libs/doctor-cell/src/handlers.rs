use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::Doctor;
use crate::services::doctor::DoctorService;

#[derive(Debug, Deserialize)]
pub struct DoctorListQuery {
    pub department_id: Option<String>,
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest(format!("Invalid {} ID format", what)))
}

#[axum::debug_handler]
pub async fn list_doctors(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<DoctorListQuery>,
) -> Result<Json<Value>, AppError> {
    let department_id = query
        .department_id
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("department_id is required".to_string()))
        .and_then(|raw| parse_id(raw, "department"))?;

    let doctor_service = DoctorService::new(&state);
    let doctors = doctor_service.list_doctors(department_id).await?;

    Ok(Json(json!({
        "department_id": department_id,
        "doctors": doctors,
        "total": doctors.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<String>,
) -> Result<Json<Doctor>, AppError> {
    let doctor_id = parse_id(&doctor_id, "doctor")?;

    let doctor_service = DoctorService::new(&state);
    let doctor = doctor_service.get_doctor(doctor_id).await?;

    Ok(Json(doctor))
}
