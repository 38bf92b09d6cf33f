use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::Hospital;
use crate::services::HospitalService;

fn parse_hospital_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("Invalid hospital ID format".to_string()))
}

#[axum::debug_handler]
pub async fn list_hospitals(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let service = HospitalService::new(&state);
    let hospitals = service.list_hospitals().await?;

    Ok(Json(json!({
        "hospitals": hospitals,
        "total": hospitals.len()
    })))
}

#[axum::debug_handler]
pub async fn get_hospital(
    State(state): State<Arc<AppConfig>>,
    Path(hospital_id): Path<String>,
) -> Result<Json<Hospital>, AppError> {
    let hospital_id = parse_hospital_id(&hospital_id)?;

    let service = HospitalService::new(&state);
    let hospital = service.get_hospital(hospital_id).await?;

    Ok(Json(hospital))
}

#[axum::debug_handler]
pub async fn list_departments(
    State(state): State<Arc<AppConfig>>,
    Path(hospital_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let hospital_id = parse_hospital_id(&hospital_id)?;

    let service = HospitalService::new(&state);
    let departments = service.list_departments(hospital_id).await?;

    Ok(Json(json!({
        "hospital_id": hospital_id,
        "departments": departments,
        "total": departments.len()
    })))
}
