use std::sync::Arc;

use axum::{
    extract::{Extension, Json, State},
    http::{HeaderMap, StatusCode},
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{TokenResponse, User};
use shared_models::error::AppError;
use shared_utils::extractor::bearer_token;
use shared_utils::jwt;

use crate::models::{AuthSession, SignInRequest, SignUpOutcome, SignUpRequest, UserProfile};
use crate::services::AuthService;

pub async fn sign_up(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SignUpOutcome>), AppError> {
    let service = AuthService::new(&config);
    let outcome = service.sign_up(request).await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn sign_in(
    State(config): State<Arc<AppConfig>>,
    Json(request): Json<SignInRequest>,
) -> Result<Json<AuthSession>, AppError> {
    let service = AuthService::new(&config);
    let session = service.sign_in(request).await?;

    Ok(Json(session))
}

pub async fn sign_out(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    debug!("Sign out requested by user: {}", user.id);

    let service = AuthService::new(&config);
    service.sign_out(auth.token()).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Signed out"
    })))
}

pub async fn get_session(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let service = AuthService::new(&config);
    let user = service.current_user(auth.token()).await?;

    Ok(Json(json!({
        "user": user
    })))
}

pub async fn get_profile(
    State(config): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<UserProfile>, AppError> {
    debug!("Getting profile for user: {}", user.id);

    let service = AuthService::new(&config);
    let profile = service.get_profile(&user.id, auth.token()).await?;

    Ok(Json(profile))
}

pub async fn validate_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AppError> {
    debug!("Validating token");

    let token = bearer_token(&headers)?;
    let user = jwt::validate_token(&token, &config.supabase_jwt_secret).map_err(AppError::Auth)?;

    Ok(Json(TokenResponse {
        valid: true,
        user_id: user.id,
        email: user.email,
        role: user.role,
    }))
}

pub async fn verify_token(
    State(config): State<Arc<AppConfig>>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    debug!("Verifying token");

    let token = bearer_token(&headers)?;
    let valid = jwt::validate_token(&token, &config.supabase_jwt_secret).is_ok();

    Ok(Json(json!({ "valid": valid })))
}
