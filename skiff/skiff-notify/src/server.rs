//! Notify service: the broker bridge plus the storage webhook.

use crate::bridge::{BridgeContext, bridge_routes};
use crate::metrics::{Metrics, metrics_routes, track_http};
use crate::webhook::{WebhookContext, webhook_routes};
use anyhow::{Context, Result};
use axum::Router;
use axum::middleware::from_fn_with_state;
use skiff_core::ChangeBroker;
use skiff_core::config::SkiffConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Standalone process owning the shared broker
pub struct NotifyServer {
    bind: String,
    broker: ChangeBroker,
    metrics: Metrics,
    webhook_token: Option<Arc<str>>,
}

impl NotifyServer {
    /// Create a server with its own broker and no webhook
    pub fn new(bind: impl Into<String>) -> Result<Self> {
        let broker = ChangeBroker::new();
        let metrics = Metrics::new(broker.clone()).context("Failed to register metrics")?;
        Ok(Self {
            bind: bind.into(),
            broker,
            metrics,
            webhook_token: None,
        })
    }

    /// Create a server from configuration, reading the webhook token file
    /// when one is configured
    pub async fn from_config(config: &SkiffConfig) -> Result<Self> {
        let mut server = Self::new(config.notify.bind.clone())?;
        if let Some(path) = &config.notify.webhook_token_file {
            server = server.with_webhook_token(read_token(path).await?);
        }
        Ok(server)
    }

    /// Enable `POST /webhook`, guarded by `token`
    pub fn with_webhook_token(mut self, token: impl Into<Arc<str>>) -> Self {
        self.webhook_token = Some(token.into());
        self
    }

    pub fn broker(&self) -> &ChangeBroker {
        &self.broker
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Build the application router
    pub fn build_app(&self, shutdown: CancellationToken) -> Router {
        let mut app = bridge_routes(BridgeContext {
            broker: self.broker.clone(),
            shutdown,
        });

        match &self.webhook_token {
            Some(token) => {
                app = app.merge(webhook_routes(WebhookContext {
                    broker: self.broker.clone(),
                    token: token.clone(),
                }));
            }
            None => warn!("No webhook token configured, storage webhook disabled"),
        }

        app.layer(from_fn_with_state(self.metrics.clone(), track_http))
            .merge(metrics_routes(self.metrics.clone()))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let socket_addr: SocketAddr = self
            .bind
            .parse()
            .context("Failed to parse socket address")?;

        let listener = TcpListener::bind(&socket_addr)
            .await
            .context("Failed to bind to address")?;

        self.serve_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let addr = listener.local_addr().context("Failed to read local address")?;
        let app = self.build_app(shutdown.clone());

        info!("Notify service listening on http://{}", addr);
        info!("  POST /v1/notify  - Publish a change");
        info!("  POST /v1/listen  - Wait for the next change");
        if self.webhook_token.is_some() {
            info!("  POST /webhook    - Storage event callback");
        }
        info!("  GET  /metrics    - Prometheus metrics");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("Server error")?;

        info!("Notify service stopped");
        Ok(())
    }
}

/// Read a bearer token from a file, trimming surrounding whitespace
pub async fn read_token(path: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read webhook token file {}", path.display()))?;

    let token = content.trim();
    if token.is_empty() {
        anyhow::bail!("Webhook token file {} is empty", path.display());
    }
    Ok(token.to_string())
}
