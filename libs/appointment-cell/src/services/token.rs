use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_redis::{Config, Pool, Runtime};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

/// Sequence keys outlive their day by one more day, then expire.
const SEQUENCE_TTL_SECONDS: u64 = 172_800;

const FALLBACK_RANGE: std::ops::RangeInclusive<i32> = 1..=100;

/// Raises the counter to at least ARGV[1], increments it and refreshes the TTL.
const NEXT_TOKEN_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local floor = tonumber(ARGV[1])
if current < floor then
  redis.call('SET', KEYS[1], floor)
end
local next_token = redis.call('INCR', KEYS[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
return next_token
"#;

/// Steps the counter back by one only while it still equals ARGV[1].
const RELEASE_TOKEN_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current == tonumber(ARGV[1]) then
  redis.call('DECR', KEYS[1])
  return 1
end
return 0
"#;

/// Where a token number came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Sequence,
    Count,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAssignment {
    pub token_number: i32,
    pub source: TokenSource,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppointmentCounter: Send + Sync {
    /// Appointments of any status booked with `doctor_id` on `date`.
    async fn count_for_day(&self, doctor_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<u64>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenSequence: Send + Sync {
    /// Reserves the next token, never returning a value at or below `floor`.
    async fn next_token(&self, doctor_id: Uuid, date: NaiveDate, floor: u64) -> Result<i32>;

    /// Hands back an unused reservation. Returns `false` when later
    /// reservations were made since, in which case the counter is untouched.
    async fn release(&self, doctor_id: Uuid, date: NaiveDate, token_number: i32) -> Result<bool>;
}

/// Process-wide sequence handed to booking handlers as a request extension.
#[derive(Clone, Default)]
pub struct SharedTokenSequence(pub Option<Arc<dyn TokenSequence>>);

pub struct SupabaseAppointmentCounter {
    supabase: SupabaseClient,
}

impl SupabaseAppointmentCounter {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }
}

#[async_trait]
impl AppointmentCounter for SupabaseAppointmentCounter {
    async fn count_for_day(&self, doctor_id: Uuid, date: NaiveDate, auth_token: &str) -> Result<u64> {
        let path = format!(
            "/rest/v1/appointments?select=id&doctor_id=eq.{}&appointment_date=eq.{}",
            doctor_id,
            date.format("%Y-%m-%d")
        );
        self.supabase.count(&path, Some(auth_token)).await
    }
}

pub struct RedisTokenSequence {
    pool: Pool,
}

impl RedisTokenSequence {
    /// Builds the pool without connecting; the first reservation opens it.
    pub fn new(redis_url: &str) -> Result<Self> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| anyhow!("Failed to create Redis pool: {}", e))?;

        Ok(Self { pool })
    }

    /// `None` when no Redis URL is configured or the pool cannot be built.
    pub fn from_config(config: &AppConfig) -> Option<Arc<dyn TokenSequence>> {
        let url = config.redis_url.as_deref()?;
        match Self::new(url) {
            Ok(sequence) => {
                info!("Token sequence backed by Redis");
                Some(Arc::new(sequence))
            }
            Err(e) => {
                warn!("Token sequence disabled: {}", e);
                None
            }
        }
    }

    fn key(doctor_id: Uuid, date: NaiveDate) -> String {
        format!("token_seq:{}:{}", doctor_id, date.format("%Y-%m-%d"))
    }
}

#[async_trait]
impl TokenSequence for RedisTokenSequence {
    async fn next_token(&self, doctor_id: Uuid, date: NaiveDate, floor: u64) -> Result<i32> {
        let mut conn = self.pool.get().await?;

        let token: i64 = redis::Script::new(NEXT_TOKEN_SCRIPT)
            .key(Self::key(doctor_id, date))
            .arg(floor)
            .arg(SEQUENCE_TTL_SECONDS)
            .invoke_async(&mut conn)
            .await?;

        i32::try_from(token).map_err(|_| anyhow!("Token sequence overflowed: {}", token))
    }

    async fn release(&self, doctor_id: Uuid, date: NaiveDate, token_number: i32) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let released: i64 = redis::Script::new(RELEASE_TOKEN_SCRIPT)
            .key(Self::key(doctor_id, date))
            .arg(token_number)
            .invoke_async(&mut conn)
            .await?;

        Ok(released == 1)
    }
}

/// Picks the next token number for a doctor's day.
pub struct TokenAssignmentService {
    counter: Arc<dyn AppointmentCounter>,
    sequence: Option<Arc<dyn TokenSequence>>,
}

impl TokenAssignmentService {
    pub fn new(counter: Arc<dyn AppointmentCounter>, sequence: Option<Arc<dyn TokenSequence>>) -> Self {
        Self { counter, sequence }
    }

    /// Never fails: a count error yields a random token so booking can go on.
    pub async fn next_token(&self, doctor_id: Uuid, date: NaiveDate, auth_token: &str) -> TokenAssignment {
        let count = match self.counter.count_for_day(doctor_id, date, auth_token).await {
            Ok(count) => count,
            Err(e) => {
                let token_number = rand::thread_rng().gen_range(FALLBACK_RANGE);
                warn!(
                    "Counting appointments for doctor {} on {} failed ({}), using random token {}",
                    doctor_id, date, e, token_number
                );
                return TokenAssignment {
                    token_number,
                    source: TokenSource::Fallback,
                };
            }
        };

        if let Some(sequence) = &self.sequence {
            match sequence.next_token(doctor_id, date, count).await {
                Ok(token_number) => {
                    debug!("Reserved token {} for doctor {} on {}", token_number, doctor_id, date);
                    return TokenAssignment {
                        token_number,
                        source: TokenSource::Sequence,
                    };
                }
                Err(e) => warn!("Token sequence unavailable, counting instead: {}", e),
            }
        }

        let token_number = i32::try_from(count).map_or(i32::MAX, |c| c.saturating_add(1));
        TokenAssignment {
            token_number,
            source: TokenSource::Count,
        }
    }

    /// Returns a sequence reservation that never reached the database.
    /// Count and fallback tokens hold no reservation.
    pub async fn release(&self, doctor_id: Uuid, date: NaiveDate, assignment: TokenAssignment) {
        let Some(sequence) = &self.sequence else {
            return;
        };
        if assignment.source != TokenSource::Sequence {
            return;
        }

        match sequence.release(doctor_id, date, assignment.token_number).await {
            Ok(true) => debug!("Released token {} for doctor {} on {}", assignment.token_number, doctor_id, date),
            Ok(false) => warn!(
                "Token {} for doctor {} on {} could not be released, later tokens already reserved",
                assignment.token_number, doctor_id, date
            ),
            Err(e) => warn!("Releasing token {} failed: {}", assignment.token_number, e),
        }
    }
}
