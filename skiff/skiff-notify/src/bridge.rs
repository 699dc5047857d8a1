//! Broker bridge RPC surface.
//!
//! Exposes a [`ChangeBroker`] over HTTP so that processes which do not share
//! memory observe each other's changes:
//!
//! - `POST /v1/notify` publishes on the broker and returns immediately.
//! - `POST /v1/listen` blocks until the next publish. Callers loop on it to
//!   emulate a subscription; the only deadline is the caller's own request
//!   timeout.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use skiff_core::ChangeBroker;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const NOTIFY_PATH: &str = "/v1/notify";
pub const LISTEN_PATH: &str = "/v1/listen";
pub const HEALTH_PATH: &str = "/healthz";

/// Empty acknowledgement returned by both RPCs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

/// Bridge state shared by the handlers
#[derive(Clone)]
pub struct BridgeContext {
    pub broker: ChangeBroker,
    /// Cancelled on shutdown so pending listens return
    pub shutdown: CancellationToken,
}

/// Create the bridge routes
pub fn bridge_routes(ctx: BridgeContext) -> Router {
    Router::new()
        .route(NOTIFY_PATH, post(notify))
        .route(LISTEN_PATH, post(listen))
        .route(HEALTH_PATH, get(healthz))
        .with_state(ctx)
}

async fn notify(State(ctx): State<BridgeContext>) -> Json<Ack> {
    debug!("Bridge notify ({} waiting)", ctx.broker.subscriber_count());
    ctx.broker.publish();
    Json(Ack {})
}

async fn listen(State(ctx): State<BridgeContext>) -> Response {
    // Dropping this future (client gone) drops the subscription with it.
    let subscription = ctx.broker.subscribe();
    if subscription.wait(&ctx.shutdown).await {
        Json(Ack {}).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response()
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
