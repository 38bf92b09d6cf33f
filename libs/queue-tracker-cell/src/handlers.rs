use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use tracing::{debug, error};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::{PatientContext, User};
use shared_models::error::AppError;
use shared_utils::extractor::bearer_token;
use shared_utils::jwt::validate_token;

use crate::models::{QueuePosition, QueueStatus};
use crate::services::{LiveQueue, QueueTrackerService, RealtimeFeed};

/// Realtime feed shared by every live queue connection.
#[derive(Clone)]
pub struct SharedRealtimeFeed(pub Arc<dyn RealtimeFeed>);

#[derive(Debug, Deserialize)]
pub struct LiveQueueQuery {
    /// Browsers cannot set headers on a WebSocket upgrade.
    pub access_token: Option<String>,
}

#[axum::debug_handler]
pub async fn get_queue_status(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<String>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(_user): Extension<User>,
) -> Result<Json<QueueStatus>, AppError> {
    let doctor_id = Uuid::parse_str(&doctor_id)
        .map_err(|_| AppError::BadRequest("Invalid doctor ID format".to_string()))?;

    let queue_service = QueueTrackerService::new(&state);
    let status = queue_service.fetch_queue_status(doctor_id, auth.token()).await?;

    Ok(Json(status))
}

#[axum::debug_handler]
pub async fn get_queue_position(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<QueuePosition>, AppError> {
    let ctx = PatientContext::new(&user, auth.token())?;

    let queue_service = QueueTrackerService::new(&state);
    let position = queue_service.current_position(&ctx).await?;

    Ok(Json(position))
}

/// Upgrades to a WebSocket that streams `QueueUpdate` frames for the
/// patient's active appointment until either side closes.
pub async fn live_queue(
    State(state): State<Arc<AppConfig>>,
    Extension(feed): Extension<SharedRealtimeFeed>,
    Query(query): Query<LiveQueueQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = match query.access_token {
        Some(token) => token,
        None => bearer_token(&headers)?,
    };
    let user = validate_token(&token, &state.supabase_jwt_secret).map_err(AppError::Auth)?;
    let ctx = PatientContext::new(&user, &token)?;

    let queue_service = QueueTrackerService::new(&state);
    let live = queue_service.start_tracking(&ctx, feed.0).await?;

    Ok(ws.on_upgrade(move |socket| stream_updates(socket, live)))
}

async fn stream_updates(mut socket: WebSocket, mut live: LiveQueue) {
    loop {
        tokio::select! {
            update = live.recv() => {
                let Some(update) = update else { break };
                let text = match serde_json::to_string(&update) {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Failed to encode queue update: {}", e);
                        break;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    debug!("Live queue client disconnected");
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    debug!("Live queue client closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    live.close().await;
    let _ = socket.send(Message::Close(None)).await;
}
