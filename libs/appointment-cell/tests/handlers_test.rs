use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
};
use async_trait::async_trait;
use axum_extra::TypedHeader;
use chrono::{Datelike, NaiveDate, Utc};
use headers::{authorization::Bearer, Authorization};
use assert_matches::assert_matches;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::handlers::{
    book_appointment, cancel_appointment, get_active_appointment, get_time_slots,
};
use appointment_cell::models::{AppointmentStatus, BookAppointmentRequest};
use appointment_cell::services::{SharedTokenSequence, TokenSequence};
use appointment_cell::TokenSource;
use shared_config::AppConfig;
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, MockSupabaseResponses, TestConfig, TestUser};

struct Fixture {
    server: MockServer,
    config: Arc<AppConfig>,
    user: TestUser,
    token: String,
    hospital_id: String,
    department_id: String,
    doctor_id: String,
    date: String,
}

/// March 11th of next year, so bookings stay in the future.
fn booking_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(Utc::now().year() + 1, 3, 11).unwrap()
}

/// Redis sequence semantics kept in memory.
#[derive(Default)]
struct MemorySequence {
    counters: Mutex<HashMap<(Uuid, NaiveDate), i32>>,
}

#[async_trait]
impl TokenSequence for MemorySequence {
    async fn next_token(&self, doctor_id: Uuid, date: NaiveDate, floor: u64) -> anyhow::Result<i32> {
        let mut counters = self.counters.lock().unwrap();
        let current = counters.entry((doctor_id, date)).or_insert(0);
        *current = (*current).max(floor as i32) + 1;
        Ok(*current)
    }

    async fn release(&self, doctor_id: Uuid, date: NaiveDate, token_number: i32) -> anyhow::Result<bool> {
        let mut counters = self.counters.lock().unwrap();
        match counters.get_mut(&(doctor_id, date)) {
            Some(current) if *current == token_number => {
                *current -= 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Fixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri()).to_arc();
        let user = TestUser::patient("asha@example.com");
        let token = JwtTestUtils::create_test_token(&user, &config.supabase_jwt_secret, Some(1));

        Self {
            server,
            config,
            user,
            token,
            hospital_id: Uuid::new_v4().to_string(),
            department_id: Uuid::new_v4().to_string(),
            doctor_id: Uuid::new_v4().to_string(),
            date: booking_day().format("%Y-%m-%d").to_string(),
        }
    }

    fn auth(&self) -> TypedHeader<Authorization<Bearer>> {
        TypedHeader(Authorization::bearer(&self.token).unwrap())
    }

    fn request(&self, date: &str, slot: &str) -> BookAppointmentRequest {
        BookAppointmentRequest {
            hospital_id: Some(self.hospital_id.parse().unwrap()),
            department_id: Some(self.department_id.parse().unwrap()),
            doctor_id: Some(self.doctor_id.parse().unwrap()),
            appointment_date: Some(date.parse::<NaiveDate>().unwrap()),
            time_slot: Some(slot.to_string()),
            notes: None,
        }
    }

    async fn mount_doctor(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/doctors"))
            .and(query_param("id", format!("eq.{}", self.doctor_id).as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::doctor_response(
                    &self.doctor_id,
                    &self.hospital_id,
                    &self.department_id,
                    "Dr. A",
                    "active",
                )
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mount_count(&self, total: u64, times: Option<u64>) {
        let range = if total == 0 {
            "*/0".to_string()
        } else {
            format!("0-{}/{}", total - 1, total)
        };
        let mock = Mock::given(method("HEAD"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("doctor_id", format!("eq.{}", self.doctor_id).as_str()))
            .respond_with(ResponseTemplate::new(200).insert_header("Content-Range", range.as_str()));

        match times {
            Some(n) => mock.up_to_n_times(n).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    fn stored_row(&self, date: &str, token_number: i32, status: &str) -> Value {
        MockSupabaseResponses::appointment_response(
            &Uuid::new_v4().to_string(),
            &self.user.id,
            &self.doctor_id,
            date,
            token_number,
            status,
        )
    }

    async fn book(&self, request: BookAppointmentRequest) -> Result<(StatusCode, Value), AppError> {
        self.book_with(request, SharedTokenSequence::default()).await
    }

    async fn book_with(
        &self,
        request: BookAppointmentRequest,
        sequence: SharedTokenSequence,
    ) -> Result<(StatusCode, Value), AppError> {
        book_appointment(
            State(self.config.clone()),
            Extension(sequence),
            self.auth(),
            Extension(self.user.to_user()),
            Json(request),
        )
        .await
        .map(|(status, confirmation)| (status, serde_json::to_value(confirmation.0).unwrap()))
    }
}

#[tokio::test]
async fn test_time_slots_lists_fixed_slots() {
    let response = get_time_slots().await.0;

    let slots = response["time_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 12);
    assert_eq!(slots[0], "09:00 AM");
    assert_eq!(slots[11], "04:30 PM");
    assert_eq!(response["steps"][4]["title"], "Confirm");
}

#[tokio::test]
async fn test_fifth_booking_of_the_day_gets_token_five() {
    let fx = Fixture::new().await;
    let date = fx.date.as_str();

    fx.mount_doctor().await;
    fx.mount_count(4, None).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({
            "doctor_id": fx.doctor_id,
            "patient_id": fx.user.id,
            "appointment_date": date,
            "appointment_time": "09:30:00",
            "token_number": 5,
            "status": "scheduled"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fx.stored_row(date, 5, "scheduled")])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let (status, confirmation) = fx.book(fx.request(date, "09:30 AM")).await.unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(confirmation["token_number"], 5);
    assert_eq!(confirmation["token_source"], "count");
    assert_eq!(
        confirmation["message"],
        format!("Token #5 assigned for March 11th, {} at 09:30 AM", booking_day().year())
    );
}

#[tokio::test]
async fn test_token_conflict_retries_with_fresh_count() {
    let fx = Fixture::new().await;
    let date = fx.date.as_str();

    fx.mount_doctor().await;
    fx.mount_count(4, Some(1)).await;
    fx.mount_count(5, None).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "token_number": 5 })))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "duplicate key value violates unique constraint",
            "23505",
        )))
        .expect(1)
        .mount(&fx.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(body_partial_json(json!({ "token_number": 6 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fx.stored_row(date, 6, "scheduled")])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let (_, confirmation) = fx.book(fx.request(date, "10:00 AM")).await.unwrap();

    assert_eq!(confirmation["token_number"], 6);
}

#[tokio::test]
async fn test_foreign_key_conflict_is_not_retried() {
    let fx = Fixture::new().await;
    let date = fx.date.as_str();

    fx.mount_doctor().await;
    fx.mount_count(4, None).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "insert or update on table \"appointments\" violates foreign key constraint",
            "23503",
        )))
        .expect(1)
        .mount(&fx.server)
        .await;

    let result = fx.book(fx.request(date, "10:00 AM")).await;
    assert_matches!(result, Err(AppError::Database(_)));
}

#[tokio::test]
async fn test_failed_insert_gives_sequence_token_back() {
    let fx = Fixture::new().await;
    let date = fx.date.as_str();
    let sequence = SharedTokenSequence(Some(Arc::new(MemorySequence::default())));

    fx.mount_doctor().await;
    fx.mount_count(4, None).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&fx.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fx.stored_row(date, 5, "scheduled")])))
        .mount(&fx.server)
        .await;

    let first = fx.book_with(fx.request(date, "09:30 AM"), sequence.clone()).await;
    assert_matches!(first, Err(AppError::Database(_)));

    let (_, confirmation) = assert_ok!(fx.book_with(fx.request(date, "09:30 AM"), sequence).await);
    assert_eq!(confirmation["token_number"], 5);
    assert_eq!(confirmation["token_source"], "sequence");

    let tokens_sent: Vec<i64> = fx
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST")
        .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap()["token_number"].as_i64().unwrap())
        .collect();
    assert_eq!(tokens_sent, vec![5, 5]);
}

#[tokio::test]
async fn test_count_failure_still_books_with_random_token() {
    let fx = Fixture::new().await;
    let date = fx.date.as_str();

    fx.mount_doctor().await;

    Mock::given(method("HEAD"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&fx.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fx.stored_row(date, 42, "scheduled")])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let (_, confirmation) = fx.book(fx.request(date, "11:30 AM")).await.unwrap();
    assert_eq!(confirmation["token_source"], "fallback");

    let requests = fx.server.received_requests().await.unwrap();
    let insert = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("insert request sent");
    let body: Value = serde_json::from_slice(&insert.body).unwrap();
    let token = body["token_number"].as_i64().unwrap();
    assert!((1..=100).contains(&token), "token {} out of fallback range", token);
}

#[tokio::test]
async fn test_incomplete_booking_rejected_before_any_call() {
    let fx = Fixture::new().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let mut request = fx.request(&fx.date, "09:00 AM");
    request.doctor_id = None;

    match fx.book(request).await.unwrap_err() {
        AppError::ValidationError(msg) => assert_eq!(msg, "Please fill all required fields"),
        other => panic!("Expected ValidationError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_doctor_from_other_department_rejected() {
    let fx = Fixture::new().await;
    fx.mount_doctor().await;

    let mut request = fx.request(&fx.date, "09:00 AM");
    request.department_id = Some(Uuid::new_v4());

    let result = fx.book(request).await;
    assert!(matches!(result, Err(AppError::ValidationError(_))));
}

#[tokio::test]
async fn test_cancel_scheduled_appointment() {
    let fx = Fixture::new().await;
    let row = fx.stored_row(&fx.date, 3, "scheduled");
    let appointment_id = row["id"].as_str().unwrap().to_string();
    let mut cancelled = row.clone();
    cancelled["status"] = json!("cancelled");

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", appointment_id).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&fx.server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("status", "eq.scheduled"))
        .and(body_partial_json(json!({ "status": "cancelled" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([cancelled])))
        .expect(1)
        .mount(&fx.server)
        .await;

    let result = cancel_appointment(
        State(fx.config.clone()),
        Path(appointment_id),
        fx.auth(),
        Extension(fx.user.to_user()),
    )
    .await;
    let response = assert_ok!(result).0;

    assert_eq!(response["success"], true);
    assert_eq!(response["appointment"]["status"], "cancelled");
}

#[tokio::test]
async fn test_cancel_reports_conflict_when_status_changed_concurrently() {
    let fx = Fixture::new().await;
    let row = fx.stored_row(&fx.date, 3, "scheduled");
    let appointment_id = row["id"].as_str().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&fx.server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fx.server)
        .await;

    let result = cancel_appointment(
        State(fx.config.clone()),
        Path(appointment_id),
        fx.auth(),
        Extension(fx.user.to_user()),
    )
    .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_cancel_completed_appointment_rejected() {
    let fx = Fixture::new().await;
    let row = fx.stored_row(&fx.date, 3, "completed");
    let appointment_id = row["id"].as_str().unwrap().to_string();

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
        .mount(&fx.server)
        .await;

    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&fx.server)
        .await;

    let result = cancel_appointment(
        State(fx.config.clone()),
        Path(appointment_id),
        fx.auth(),
        Extension(fx.user.to_user()),
    )
    .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_active_appointment_is_first_scheduled() {
    let fx = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("patient_id", format!("eq.{}", fx.user.id).as_str()))
        .and(query_param("status", "eq.scheduled"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            fx.stored_row(&fx.date, 7, "scheduled")
        ])))
        .mount(&fx.server)
        .await;

    let result = get_active_appointment(
        State(fx.config.clone()),
        fx.auth(),
        Extension(fx.user.to_user()),
    )
    .await;
    let appointment = assert_ok!(result).0;

    assert_eq!(appointment.token_number, 7);
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
}

#[tokio::test]
async fn test_no_active_appointment_is_not_found() {
    let fx = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fx.server)
        .await;

    let result = get_active_appointment(
        State(fx.config.clone()),
        fx.auth(),
        Extension(fx.user.to_user()),
    )
    .await;

    match result.unwrap_err() {
        AppError::NotFound(msg) => assert_eq!(msg, "No active appointment"),
        other => panic!("Expected NotFound, got {:?}", other),
    }
}

#[test]
fn test_token_source_serializes_snake_case() {
    assert_eq!(serde_json::to_value(TokenSource::Sequence).unwrap(), "sequence");
}
