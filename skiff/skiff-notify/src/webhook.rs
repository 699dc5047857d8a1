//! Storage provider webhook.
//!
//! Translates bucket notifications (MinIO / S3 event callbacks) into broker
//! publishes. Only object creation and removal events count as a change.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use serde::Deserialize;
use skiff_core::ChangeBroker;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

pub const WEBHOOK_PATH: &str = "/webhook";

/// Event names that mean the bucket contents changed
const CHANGE_EVENTS: &[&str] = &[
    "s3:ObjectRemoved:Delete",
    "s3:ObjectCreated:Put",
    "s3:ObjectCreated:Copy",
];

/// The part of a bucket notification the webhook looks at
#[derive(Debug, Deserialize)]
pub struct StorageEvent {
    #[serde(rename = "EventName", alias = "eventName")]
    pub event_name: String,
    #[serde(rename = "Key", alias = "key", default)]
    pub key: Option<String>,
}

#[derive(Clone)]
pub struct WebhookContext {
    pub broker: ChangeBroker,
    pub token: Arc<str>,
}

/// Create the webhook route
pub fn webhook_routes(ctx: WebhookContext) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook))
        .with_state(ctx)
}

/// Whether an event name denotes a change of bucket contents
pub fn means_change(event_name: &str) -> bool {
    CHANGE_EVENTS.contains(&event_name)
}

fn is_authorized(headers: &HeaderMap, token: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let expected = format!("Bearer {}", token);
    value.as_bytes().ct_eq(expected.as_bytes()).into()
}

async fn webhook(
    State(ctx): State<WebhookContext>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !is_authorized(&headers, &ctx.token) {
        warn!("Rejected webhook call with invalid credentials");
        return StatusCode::UNAUTHORIZED;
    }

    let event: StorageEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Failed to parse webhook event: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    if !means_change(&event.event_name) {
        debug!("Ignoring storage event {}", event.event_name);
        return StatusCode::OK;
    }

    debug!(
        "Storage event {} for {}",
        event.event_name,
        event.key.as_deref().unwrap_or("<unknown>")
    );
    ctx.broker.publish();
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn context() -> WebhookContext {
        WebhookContext {
            broker: ChangeBroker::new(),
            token: Arc::from("secret"),
        }
    }

    fn request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder =
            Request::post(WEBHOOK_PATH).header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn test_means_change() {
        assert!(means_change("s3:ObjectCreated:Put"));
        assert!(means_change("s3:ObjectRemoved:Delete"));
        assert!(means_change("s3:ObjectCreated:Copy"));
        assert!(!means_change("s3:ObjectAccessed:Get"));
        assert!(!means_change(""));
    }

    #[tokio::test]
    async fn test_change_event_publishes() {
        let ctx = context();
        let response = webhook_routes(ctx.clone())
            .oneshot(request(
                Some("Bearer secret"),
                r#"{"EventName":"s3:ObjectCreated:Put","Key":"bucket/docs/a.txt"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.broker.published(), 1);
    }

    #[tokio::test]
    async fn test_other_events_ignored() {
        let ctx = context();
        let response = webhook_routes(ctx.clone())
            .oneshot(request(
                Some("Bearer secret"),
                r#"{"EventName":"s3:ObjectAccessed:Get"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.broker.published(), 0);
    }

    #[tokio::test]
    async fn test_rejects_bad_token() {
        let ctx = context();
        for auth in [None, Some("Bearer wrong"), Some("secret")] {
            let response = webhook_routes(ctx.clone())
                .oneshot(request(auth, r#"{"EventName":"s3:ObjectCreated:Put"}"#))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        assert_eq!(ctx.broker.published(), 0);
    }

    #[tokio::test]
    async fn test_rejects_malformed_body() {
        let ctx = context();
        let response = webhook_routes(ctx.clone())
            .oneshot(request(Some("Bearer secret"), "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ctx.broker.published(), 0);
    }
}
