use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use auth_cell::router::auth_routes;
use doctor_cell::router::doctor_routes;
use hospital_cell::router::hospital_routes;
use queue_tracker_cell::router::queue_routes;
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "MediQueue API is running!" }))
        .nest("/auth", auth_routes(state.clone()))
        .nest("/hospitals", hospital_routes(state.clone()))
        .nest("/doctors", doctor_routes(state.clone()))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/queue", queue_routes(state))
}
