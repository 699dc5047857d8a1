//! WebSocket upgrade for streaming sessions

use super::error::ApiError;
use super::session::Session;
use super::state::AppState;
use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tracing::{debug, warn};

pub const WEBSOCKET_PATH: &str = "/ws";

/// Create WebSocket routes
pub fn websocket_routes(state: AppState) -> Router {
    Router::new()
        .route(WEBSOCKET_PATH, get(ws_handler))
        .with_state(state)
}

/// Whether a browser origin may open a session. Requests without an `Origin`
/// header come from non-browser clients and are always allowed.
fn origin_allowed(headers: &HeaderMap, frontend_url: Option<&str>) -> bool {
    let Some(frontend) = frontend_url else {
        return true;
    };
    match headers.get(header::ORIGIN).map(|v| v.to_str()) {
        None => true,
        Some(Ok(origin)) => origin.trim_end_matches('/') == frontend,
        Some(Err(_)) => false,
    }
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&headers, state.frontend_url.as_deref()) {
        warn!(
            "Rejected WebSocket upgrade from origin {:?}",
            headers.get(header::ORIGIN)
        );
        return ApiError::Forbidden("origin not allowed".to_string()).into_response();
    }

    let limit = state.session.max_message_size;
    let session = Session::new(state.session_context());
    let cancel = state.shutdown.clone();
    debug!("Upgrading connection for session {}", session.id());

    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| session.run(socket, cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(header::ORIGIN, HeaderValue::from_str(origin).unwrap());
        }
        headers
    }

    #[test]
    fn test_origin_check() {
        let frontend = Some("https://files.example.com");

        assert!(origin_allowed(&headers(None), frontend));
        assert!(origin_allowed(&headers(Some("https://files.example.com")), frontend));
        assert!(origin_allowed(&headers(Some("https://files.example.com/")), frontend));
        assert!(!origin_allowed(&headers(Some("https://evil.example.com")), frontend));
        assert!(origin_allowed(&headers(Some("https://anything.example.com")), None));
    }
}
