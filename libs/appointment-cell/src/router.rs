// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::token::{RedisTokenSequence, SharedTokenSequence};

pub fn appointment_routes(state: Arc<AppConfig>) -> Router {
    let sequence = SharedTokenSequence(RedisTokenSequence::from_config(&state));

    // All appointment operations require authentication
    let protected_routes = Router::new()
        .route("/", post(handlers::book_appointment).get(handlers::list_appointments))
        .route("/time-slots", get(handlers::get_time_slots))
        .route("/active", get(handlers::get_active_appointment))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(Extension(sequence));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
