//! Skiff notify service.
//!
//! Hosts a single [`ChangeBroker`](skiff_core::ChangeBroker) for a fleet of
//! Skiff servers. Servers publish with `POST /v1/notify` and follow changes
//! by long polling `POST /v1/listen`; the object store reports its own
//! mutations through `POST /webhook`.
//!
//! The [`metrics`] module is shared with the server: both expose Prometheus
//! HTTP and broker metrics on `GET /metrics`.

pub mod bridge;
pub mod client;
pub mod metrics;
pub mod server;
pub mod webhook;

pub use bridge::{Ack, BridgeContext, bridge_routes};
pub use client::{BridgeClient, ChangeNotifier};
pub use metrics::{Metrics, metrics_routes, track_http};
pub use server::NotifyServer;
pub use webhook::{WebhookContext, webhook_routes};
