use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub valid: bool,
    pub user_id: String,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Identity of the signed-in patient, passed explicitly into booking and
/// dashboard services. Built from the authenticated `User` and the bearer
/// token of the current request or live connection.
#[derive(Debug, Clone)]
pub struct PatientContext {
    pub patient_id: Uuid,
    pub access_token: String,
    pub email: Option<String>,
}

impl PatientContext {
    pub fn new(user: &User, access_token: &str) -> Result<Self, AppError> {
        let patient_id = Uuid::parse_str(&user.id)
            .map_err(|_| AppError::BadRequest("Invalid user ID format".to_string()))?;

        Ok(Self {
            patient_id,
            access_token: access_token.to_string(),
            email: user.email.clone(),
        })
    }
}
