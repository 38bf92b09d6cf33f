use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, QueueSettings};
use shared_models::auth::User;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    /// Config pointing at a mock server.
    pub fn with_supabase_url(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_realtime_url: None,
            redis_url: None,
            queue: QueueSettings::default(),
            port: 3000,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// A signed-in patient as the auth provider would describe them.
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
    pub full_name: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self::patient("patient@example.com")
    }
}

impl TestUser {
    pub fn patient(email: &str) -> Self {
        Self::with_role(email, "patient")
    }

    pub fn with_role(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
            full_name: "Test Patient".to_string(),
        }
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: Some(json!({ "full_name": self.full_name })),
            created_at: Some(Utc::now()),
        }
    }

    /// Access-token claims for this user, expiring `lifetime` from now.
    pub fn claims(&self, lifetime: Duration) -> Value {
        let now = Utc::now();

        json!({
            "sub": self.id,
            "email": self.email,
            "role": self.role,
            "aud": "authenticated",
            "user_metadata": { "full_name": self.full_name },
            "iat": now.timestamp(),
            "exp": (now + lifetime).timestamp()
        })
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    /// HS256 over unpadded base64url segments.
    pub fn sign(claims: &Value, secret: &str) -> String {
        let header = json!({ "alg": "HS256", "typ": "JWT" });
        let signing_input = format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(header.to_string()),
            general_purpose::URL_SAFE_NO_PAD.encode(claims.to_string())
        );

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(signing_input.as_bytes());
        let signature = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature)
    }

    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        Self::sign(&user.claims(Duration::hours(exp_hours.unwrap_or(24))), secret)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "not-the-project-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Row shapes as PostgREST returns them for the tables this service reads.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn hospital_response(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "location": "Downtown",
            "address": "1 Main Street",
            "phone": null,
            "latitude": 12.97,
            "longitude": 77.59,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn department_response(id: &str, hospital_id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "hospital_id": hospital_id,
            "name": name,
            "description": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn doctor_response(
        id: &str,
        hospital_id: &str,
        department_id: &str,
        name: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "specialization": "Senior Cardiologist",
            "hospital_id": hospital_id,
            "department_id": department_id,
            "status": status,
            "availability_start": null,
            "availability_end": null,
            "working_days": null,
            "user_id": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn appointment_response(
        id: &str,
        patient_id: &str,
        doctor_id: &str,
        date: &str,
        token_number: i32,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "department_id": null,
            "hospital_id": Uuid::new_v4(),
            "appointment_date": date,
            "appointment_time": "09:00:00",
            "token_number": token_number,
            "status": status,
            "estimated_wait_time": null,
            "notes": null,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })
    }

    pub fn queue_status_response(doctor_id: &str, current_token: i32) -> serde_json::Value {
        json!({
            "id": Uuid::new_v4(),
            "doctor_id": doctor_id,
            "current_token": current_token,
            "is_active": true,
            "last_updated": "2024-01-01T09:30:00Z"
        })
    }

    pub fn session_response(user_id: &str, email: &str) -> serde_json::Value {
        json!({
            "access_token": "access-token",
            "token_type": "bearer",
            "expires_in": 3600,
            "expires_at": 1_900_000_000,
            "refresh_token": "refresh-token",
            "user": {
                "id": user_id,
                "email": email,
                "role": "authenticated",
                "user_metadata": {"full_name": "Test User"},
                "created_at": "2024-01-01T00:00:00Z"
            }
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
