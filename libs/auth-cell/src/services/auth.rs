use std::sync::OnceLock;

use regex::Regex;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_database::{SupabaseApiError, SupabaseClient};

use crate::models::{
    AppRole, AuthError, AuthSession, AuthUser, Profile, SignInRequest, SignUpOutcome,
    SignUpRequest, UserProfile, UserRole,
};

const MIN_PASSWORD_LENGTH: usize = 6;

fn email_pattern() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok())
        .as_ref()
}

/// Thin client over the auth provider's password grant and user endpoints.
pub struct AuthService {
    supabase: SupabaseClient,
}

impl AuthService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn sign_up(&self, request: SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        validate_sign_up(&request)?;
        debug!("Signing up {}", request.email);

        let body = json!({
            "email": request.email.trim(),
            "password": request.password,
            "data": {
                "full_name": request.full_name.trim(),
                "phone": request.phone,
            }
        });

        let response: Value = self
            .supabase
            .request(Method::POST, "/auth/v1/signup", None, Some(body))
            .await
            .map_err(map_provider_error)?;

        let outcome = parse_sign_up(response)?;
        info!(
            "User {} signed up (confirmation required: {})",
            outcome.user.id, outcome.confirmation_required
        );
        Ok(outcome)
    }

    pub async fn sign_in(&self, request: SignInRequest) -> Result<AuthSession, AuthError> {
        if request.email.trim().is_empty() || request.password.is_empty() {
            return Err(AuthError::Validation("Email and password are required".to_string()));
        }

        let body = json!({
            "email": request.email.trim(),
            "password": request.password,
        });

        let session: AuthSession = self
            .supabase
            .request(
                Method::POST,
                "/auth/v1/token?grant_type=password",
                None,
                Some(body),
            )
            .await
            .map_err(map_provider_error)?;

        info!("User {} signed in", session.user.id);
        Ok(session)
    }

    /// Revokes the session behind `access_token`.
    pub async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.supabase
            .request_empty(Method::POST, "/auth/v1/logout", Some(access_token), None)
            .await
            .map_err(map_provider_error)?;

        info!("Session signed out");
        Ok(())
    }

    pub async fn current_user(&self, access_token: &str) -> Result<AuthUser, AuthError> {
        self.supabase
            .request(Method::GET, "/auth/v1/user", Some(access_token), None)
            .await
            .map_err(map_provider_error)
    }

    pub async fn get_profile(&self, user_id: &str, access_token: &str) -> Result<UserProfile, AuthError> {
        let profiles: Vec<Profile> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/profiles?id=eq.{}", user_id),
                Some(access_token),
                None,
            )
            .await
            .map_err(map_provider_error)?;

        let roles: Vec<UserRole> = self
            .supabase
            .request(
                Method::GET,
                &format!("/rest/v1/user_roles?user_id=eq.{}", user_id),
                Some(access_token),
                None,
            )
            .await
            .map_err(map_provider_error)?;

        if profiles.is_empty() {
            warn!("No profile row for user {}", user_id);
        }

        Ok(UserProfile {
            user_id: user_id.to_string(),
            profile: profiles.into_iter().next(),
            roles: roles.into_iter().map(|r| r.role).collect::<Vec<AppRole>>(),
        })
    }
}

pub fn validate_sign_up(request: &SignUpRequest) -> Result<(), AuthError> {
    if !email_pattern().is_some_and(|re| re.is_match(request.email.trim())) {
        return Err(AuthError::Validation("Invalid email address".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    if request.full_name.trim().is_empty() {
        return Err(AuthError::Validation("Full name is required".to_string()));
    }
    Ok(())
}

fn parse_sign_up(response: Value) -> Result<SignUpOutcome, AuthError> {
    let parse_err = |e: serde_json::Error| AuthError::Provider(format!("Unexpected sign-up response: {}", e));

    if response.get("access_token").is_some() {
        let session: AuthSession = serde_json::from_value(response).map_err(parse_err)?;
        return Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
            confirmation_required: false,
        });
    }

    let user_value = response.get("user").cloned().unwrap_or(response);
    let user: AuthUser = serde_json::from_value(user_value).map_err(parse_err)?;

    Ok(SignUpOutcome {
        user,
        session: None,
        confirmation_required: true,
    })
}

fn map_provider_error(err: anyhow::Error) -> AuthError {
    match err.downcast_ref::<SupabaseApiError>() {
        Some(api_err) if api_err.is_auth() => AuthError::InvalidCredentials(api_err.provider_message()),
        Some(api_err) => AuthError::Provider(api_err.provider_message()),
        None => AuthError::Provider(err.to_string()),
    }
}
