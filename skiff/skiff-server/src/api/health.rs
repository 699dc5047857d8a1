//! Health check endpoint served on the admin listener

use super::state::AppState;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::{Deserialize, Serialize};
use skiff_core::ObjectStore;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Open streaming sessions
    pub sessions: usize,
}

/// Create health check routes
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = match state.store.healthy().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!("Storage health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    let health = HealthResponse {
        status: label.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.broker.subscriber_count(),
    };
    (status, Json(health))
}
