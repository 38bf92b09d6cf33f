use std::sync::Arc;

use axum::{routing::get, Router};

use shared_config::AppConfig;

use crate::handlers;

/// Hospital and department browsing is public.
pub fn hospital_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_hospitals))
        .route("/{hospital_id}", get(handlers::get_hospital))
        .route("/{hospital_id}/departments", get(handlers::list_departments))
        .with_state(state)
}
