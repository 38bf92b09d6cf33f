use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// One row per doctor, advanced by clinic staff. This service only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub id: Uuid,
    pub doctor_id: Uuid,
    #[serde(default, deserialize_with = "zero_if_null")]
    pub current_token: i32,
    #[serde(default = "active_by_default", deserialize_with = "active_if_null")]
    pub is_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl QueueStatus {
    /// Stand-in for a doctor whose queue row does not exist yet.
    pub fn not_started(doctor_id: Uuid) -> Self {
        Self {
            id: Uuid::nil(),
            doctor_id,
            current_token: 0,
            is_active: false,
            last_updated: None,
        }
    }
}

fn active_by_default() -> bool {
    true
}

fn zero_if_null<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<i32>::deserialize(deserializer)?.unwrap_or(0))
}

fn active_if_null<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

/// Where a patient stands in their doctor's queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuePosition {
    pub appointment_id: Uuid,
    pub doctor_id: Uuid,
    pub token_number: i32,
    pub current_token: i32,
    /// Negative once the patient's token has been passed.
    pub tokens_ahead: i32,
    pub estimated_wait_minutes: u32,
    pub is_your_turn: bool,
    pub queue_active: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NearTurnAlert {
    pub tokens_ahead: i32,
    pub message: String,
}

impl NearTurnAlert {
    pub const MESSAGE: &'static str = "Your turn is approaching";

    pub fn new(tokens_ahead: i32) -> Self {
        Self {
            tokens_ahead,
            message: Self::MESSAGE.to_string(),
        }
    }
}

/// Frame pushed to a live queue client after every recompute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueUpdate {
    pub position: QueuePosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<NearTurnAlert>,
}
