//! HTTP exposure of the serving status.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use crate::health::state::{HealthReporter, ServingStatus};

/// Path polled by other processes.
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ServingStatus,
}

pub fn health_router(health: HealthReporter) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(get_health))
        .with_state(health)
}

async fn get_health(State(health): State<HealthReporter>) -> (StatusCode, Json<HealthResponse>) {
    let status = health.status();
    let code = if status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthResponse { status }))
}
