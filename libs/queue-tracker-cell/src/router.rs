use std::sync::Arc;

use axum::{middleware, routing::get, Extension, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers::{self, SharedRealtimeFeed};
use crate::services::SupabaseRealtimeFeed;

pub fn queue_routes(state: Arc<AppConfig>) -> Router {
    let feed = SharedRealtimeFeed(Arc::new(SupabaseRealtimeFeed::new(&state)));
    queue_routes_with_feed(state, feed)
}

pub fn queue_routes_with_feed(state: Arc<AppConfig>, feed: SharedRealtimeFeed) -> Router {
    let protected_routes = Router::new()
        .route("/doctors/{doctor_id}", get(handlers::get_queue_status))
        .route("/position", get(handlers::get_queue_position))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Authenticates itself from the header or the `access_token` query.
    let live_routes = Router::new()
        .route("/live", get(handlers::live_queue))
        .layer(Extension(feed));

    Router::new()
        .merge(protected_routes)
        .merge(live_routes)
        .with_state(state)
}
