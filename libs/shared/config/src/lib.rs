use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// How often the near-turn alert is raised while a patient stays inside the
/// alert window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NearTurnAlertMode {
    EveryUpdate,
    Once,
}

impl FromStr for NearTurnAlertMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "every_update" | "every-update" | "always" => Ok(NearTurnAlertMode::EveryUpdate),
            "once" => Ok(NearTurnAlertMode::Once),
            other => Err(format!("unknown near-turn alert mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub minutes_per_patient: u32,
    pub near_turn_threshold: i32,
    pub near_turn_alert: NearTurnAlertMode,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            minutes_per_patient: 3,
            near_turn_threshold: 3,
            near_turn_alert: NearTurnAlertMode::EveryUpdate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_realtime_url: Option<String>,
    pub redis_url: Option<String>,
    pub queue: QueueSettings,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = QueueSettings::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_realtime_url: env::var("SUPABASE_REALTIME_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            queue: QueueSettings {
                minutes_per_patient: parse_or("QUEUE_MINUTES_PER_PATIENT", defaults.minutes_per_patient),
                near_turn_threshold: parse_or("QUEUE_NEAR_TURN_THRESHOLD", defaults.near_turn_threshold),
                near_turn_alert: parse_or("QUEUE_NEAR_TURN_ALERT", defaults.near_turn_alert),
            },
            port: parse_or("PORT", 3000),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, token numbers fall back to count-based assignment");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Realtime WebSocket endpoint. Derived from the project URL unless set
    /// explicitly.
    pub fn realtime_url(&self) -> String {
        if let Some(url) = &self.supabase_realtime_url {
            return url.clone();
        }

        let base = self.supabase_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };

        format!("{}/realtime/v1/websocket", ws_base)
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid value for {} ({}), using default", key, e);
            default
        }),
        Err(_) => default,
    }
}
