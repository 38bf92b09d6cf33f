use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use super::channel::TaskChannel;
use crate::error::QueueTrackerError;
use crate::models::QueueStatus;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long the server gets to acknowledge `phx_join`.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

const JOIN_REF: &str = "1";

/// Stream of queue status rows for one doctor, fed by a listener task.
pub type QueueSubscription = TaskChannel<QueueStatus>;

#[async_trait]
pub trait RealtimeFeed: Send + Sync {
    /// Resolves once the server has accepted the subscription.
    async fn subscribe(
        &self,
        doctor_id: Uuid,
        access_token: &str,
    ) -> Result<QueueSubscription, QueueTrackerError>;
}

/// Phoenix channel client for Supabase Realtime `postgres_changes`.
pub struct SupabaseRealtimeFeed {
    realtime_url: String,
    api_key: String,
    heartbeat_interval: Duration,
}

impl SupabaseRealtimeFeed {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            realtime_url: config.realtime_url(),
            api_key: config.supabase_anon_key.clone(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn socket_url(&self) -> String {
        format!(
            "{}?apikey={}&vsn=1.0.0",
            self.realtime_url,
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait]
impl RealtimeFeed for SupabaseRealtimeFeed {
    async fn subscribe(
        &self,
        doctor_id: Uuid,
        access_token: &str,
    ) -> Result<QueueSubscription, QueueTrackerError> {
        let (mut socket, _) = connect_async(self.socket_url())
            .await
            .map_err(|e| QueueTrackerError::RealtimeError(e.to_string()))?;

        socket
            .send(Message::Text(join_message(doctor_id, access_token).to_string()))
            .await
            .map_err(|e| QueueTrackerError::RealtimeError(e.to_string()))?;

        let early = await_join(&mut socket, doctor_id, JOIN_TIMEOUT).await?;
        info!("Joined {}", topic(doctor_id));

        let heartbeat_interval = self.heartbeat_interval;
        Ok(TaskChannel::spawn(move |sender, shutdown| {
            listen(socket, doctor_id, heartbeat_interval, early, sender, shutdown)
        }))
    }
}

pub fn topic(doctor_id: Uuid) -> String {
    format!("realtime:queue_status:{}", doctor_id)
}

pub fn join_message(doctor_id: Uuid, access_token: &str) -> Value {
    json!({
        "topic": topic(doctor_id),
        "event": "phx_join",
        "payload": {
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "UPDATE",
                    "schema": "public",
                    "table": "queue_status",
                    "filter": format!("doctor_id=eq.{}", doctor_id)
                }]
            },
            "access_token": access_token
        },
        "ref": JOIN_REF,
        "join_ref": JOIN_REF
    })
}

pub fn heartbeat_message(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string()
    })
}

pub fn leave_message(doctor_id: Uuid, reference: u64) -> Value {
    json!({
        "topic": topic(doctor_id),
        "event": "phx_leave",
        "payload": {},
        "ref": reference.to_string(),
        "join_ref": JOIN_REF
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Change(QueueStatus),
    Joined,
    /// Join refused, or the server reported a channel error.
    Failed(String),
    Closed,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref")]
    reference: Option<String>,
}

pub fn parse_realtime_message(text: &str) -> Result<RealtimeEvent, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let event = match envelope.event.as_str() {
        "postgres_changes" => {
            let record = envelope
                .payload
                .get("data")
                .and_then(|data| data.get("record"))
                .cloned()
                .unwrap_or(Value::Null);
            RealtimeEvent::Change(serde_json::from_value(record)?)
        }
        "phx_reply" if envelope.reference.as_deref() == Some(JOIN_REF) => {
            match envelope.payload.get("status").and_then(Value::as_str) {
                Some("ok") => RealtimeEvent::Joined,
                _ => RealtimeEvent::Failed(reason(&envelope.payload)),
            }
        }
        "system" if envelope.payload.get("status").and_then(Value::as_str) == Some("error") => {
            RealtimeEvent::Failed(reason(&envelope.payload))
        }
        "phx_error" => RealtimeEvent::Failed(format!("channel error on {}", envelope.topic)),
        "phx_close" => RealtimeEvent::Closed,
        _ => RealtimeEvent::Ignored,
    };

    Ok(event)
}

fn reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown reason")
        .to_string()
}

/// Reads frames until the join is acknowledged. Changes delivered ahead of
/// the reply are handed back so they reach the subscriber.
async fn await_join<S>(
    socket: &mut S,
    doctor_id: Uuid,
    join_timeout: Duration,
) -> Result<Vec<QueueStatus>, QueueTrackerError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + join_timeout;
    let mut early = Vec::new();

    loop {
        let frame = tokio::time::timeout_at(deadline, socket.next())
            .await
            .map_err(|_| {
                QueueTrackerError::RealtimeError(format!(
                    "No reply to join on {} within {:?}",
                    topic(doctor_id),
                    join_timeout
                ))
            })?;

        match frame {
            Some(Ok(Message::Text(text))) => match parse_realtime_message(&text) {
                Ok(RealtimeEvent::Joined) => return Ok(early),
                Ok(RealtimeEvent::Change(status)) => early.push(status),
                Ok(RealtimeEvent::Failed(reason)) => {
                    warn!("Join on {} refused: {}", topic(doctor_id), reason);
                    return Err(QueueTrackerError::RealtimeError(format!("Join refused: {}", reason)));
                }
                Ok(RealtimeEvent::Closed) => {
                    return Err(QueueTrackerError::RealtimeError(
                        "Channel closed before join".to_string(),
                    ))
                }
                Ok(RealtimeEvent::Ignored) => {}
                Err(e) => warn!("Unreadable realtime message: {}", e),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err(QueueTrackerError::RealtimeError(
                    "Socket closed before join".to_string(),
                ))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(QueueTrackerError::RealtimeError(e.to_string())),
        }
    }
}

#[instrument(skip(socket, early, sender, shutdown), fields(doctor_id = %doctor_id))]
async fn listen<S>(
    socket: S,
    doctor_id: Uuid,
    heartbeat_interval: Duration,
    early: Vec<QueueStatus>,
    sender: mpsc::Sender<QueueStatus>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Unpin
        + Send,
{
    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    let mut next_ref: u64 = 2;

    for status in early {
        if sender.send(status).await.is_err() {
            debug!("Subscriber went away");
            return;
        }
    }

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                debug!("Listener shutdown requested");
                break;
            }
            _ = heartbeat.tick() => {
                let frame = Message::Text(heartbeat_message(next_ref).to_string());
                next_ref += 1;
                if let Err(e) = sink.send(frame).await {
                    error!("Heartbeat failed: {}", e);
                    return;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_realtime_message(&text) {
                    Ok(RealtimeEvent::Change(status)) => {
                        debug!("Queue for doctor {} now serving {}", doctor_id, status.current_token);
                        if sender.send(status).await.is_err() {
                            debug!("Subscriber went away");
                            break;
                        }
                    }
                    Ok(RealtimeEvent::Joined) => debug!("Duplicate join reply"),
                    Ok(RealtimeEvent::Failed(reason)) => {
                        error!("Realtime subscription failed: {}", reason);
                        return;
                    }
                    Ok(RealtimeEvent::Closed) => {
                        info!("Channel closed by server");
                        return;
                    }
                    Ok(RealtimeEvent::Ignored) => {}
                    Err(e) => warn!("Unreadable realtime message: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Realtime socket closed");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Realtime socket error: {}", e);
                    return;
                }
            }
        }
    }

    let leave = Message::Text(leave_message(doctor_id, next_ref).to_string());
    if let Err(e) = sink.send(leave).await {
        warn!("Failed to leave channel: {}", e);
    }
    if let Err(e) = sink.close().await {
        debug!("Socket close failed: {}", e);
    }
    info!("Left {}", topic(doctor_id));
}
