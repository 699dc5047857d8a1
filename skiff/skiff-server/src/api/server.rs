//! Skiff server: public HTTP/WebSocket listener plus the admin listener.

use super::files::file_routes;
use super::health::health_routes;
use super::middleware::cors_layer;
use super::state::AppState;
use super::thumbnails::thumbnail_routes;
use super::websocket::websocket_routes;
use anyhow::{Context, Result};
use axum::Router;
use axum::middleware::from_fn_with_state;
use skiff_core::config::{SkiffConfig, StorageBackend, StorageConfig};
use skiff_core::{ChangeBroker, FsStore, MemoryStore, SharedStore};
use skiff_notify::{BridgeClient, ChangeNotifier, Metrics, metrics_routes, track_http};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Open the configured storage backend
pub async fn open_store(config: &StorageConfig) -> Result<SharedStore> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory object store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Fs => {
            let root = config
                .root
                .as_ref()
                .context("storage root must be set for the fs backend")?;
            let store = FsStore::open(root)
                .await
                .with_context(|| format!("Failed to open storage root {}", root.display()))?;
            info!("Using filesystem object store at {}", root.display());
            Ok(Arc::new(store))
        }
    }
}

/// Open the thumbnail cache: a directory when configured, memory otherwise
pub async fn open_thumbnail_cache(config: &StorageConfig) -> Result<SharedStore> {
    match &config.thumbnail_root {
        Some(root) => {
            let cache = FsStore::open(root)
                .await
                .with_context(|| format!("Failed to open thumbnail cache {}", root.display()))?;
            info!("Caching thumbnails at {}", root.display());
            Ok(Arc::new(cache))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Skiff server
pub struct SkiffServer {
    bind: String,
    admin_bind: String,
    grace: Duration,
    state: AppState,
    metrics: Metrics,
    bridge: Option<BridgeClient>,
}

impl SkiffServer {
    /// Create a server from configuration, opening the configured store
    pub async fn from_config(config: &SkiffConfig, shutdown: CancellationToken) -> Result<Self> {
        let store = open_store(&config.storage).await?;
        let cache = open_thumbnail_cache(&config.storage).await?;
        let mut server = Self::with_store(config, store, shutdown)?;
        server.state = server.state.with_thumbnail_cache(cache);
        Ok(server)
    }

    /// Create a server over an existing store.
    ///
    /// With a notify endpoint configured, changes are announced to the notify
    /// service and its wake-ups are relayed into the local broker; otherwise
    /// changes are published on the local broker directly.
    pub fn with_store(
        config: &SkiffConfig,
        store: SharedStore,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let broker = ChangeBroker::new();
        let bridge = BridgeClient::from_config(&config.notify)?;

        let notifier: Arc<dyn ChangeNotifier> = match &bridge {
            Some(client) => {
                info!("Publishing changes through {}", client.endpoint());
                Arc::new(client.clone())
            }
            None => {
                info!("No notify endpoint configured, publishing changes locally");
                Arc::new(broker.clone())
            }
        };

        let metrics = Metrics::new(broker.clone()).context("Failed to register metrics")?;
        let state = AppState::new(store, &config.server, broker, notifier, shutdown);

        Ok(Self {
            bind: config.server.bind.clone(),
            admin_bind: config.server.admin_bind.clone(),
            grace: config.server.shutdown_grace(),
            state,
            metrics,
            bridge,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Build the public application router
    pub fn build_app(&self) -> Router {
        Router::new()
            .merge(file_routes(self.state.clone()))
            .merge(websocket_routes(self.state.clone()))
            .merge(thumbnail_routes(self.state.clone()))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer(self.state.frontend_url.as_deref()))
                    .layer(from_fn_with_state(self.metrics.clone(), track_http)),
            )
    }

    /// Build the admin router
    pub fn build_admin_app(&self) -> Router {
        health_routes(self.state.clone())
            .merge(metrics_routes(self.metrics.clone()))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Bind both configured addresses and serve until shutdown
    pub async fn serve(self) -> Result<()> {
        let public = bind(&self.bind).await?;
        let admin = bind(&self.admin_bind).await?;
        self.serve_listeners(public, admin).await
    }

    /// Serve on already bound listeners until the shutdown token fires
    pub async fn serve_listeners(self, public: TcpListener, admin: TcpListener) -> Result<()> {
        let shutdown = self.state.shutdown.clone();
        let public_addr = public.local_addr().context("Failed to read local address")?;
        let admin_addr = admin.local_addr().context("Failed to read local address")?;

        if let Some(bridge) = self.bridge.clone() {
            tokio::spawn(bridge.relay(self.state.broker.clone(), shutdown.child_token()));
        }

        let app = self.build_app();
        let admin_app = self.build_admin_app();

        info!("Skiff server listening on http://{}", public_addr);
        info!("  GET    /files/{{path}}  - Download a file or list a directory");
        info!("  PUT    /files/{{path}}  - Upload a file");
        info!("  DELETE /files/{{path}}  - Delete a file");
        info!("  GET    /ws             - Streaming session");
        info!("  GET    /thumbnails/{{etag}}/{{path}} - Image thumbnail");
        info!("Admin listening on http://{}", admin_addr);
        info!("  GET    /healthz        - Health check");
        info!("  GET    /metrics        - Prometheus metrics");

        let public_shutdown = shutdown.clone();
        let public_server = axum::serve(public, app)
            .with_graceful_shutdown(async move { public_shutdown.cancelled().await });
        let admin_shutdown = shutdown.clone();
        let admin_server = axum::serve(admin, admin_app)
            .with_graceful_shutdown(async move { admin_shutdown.cancelled().await });

        let servers = async {
            tokio::try_join!(
                async { public_server.await.context("Server error") },
                async { admin_server.await.context("Admin server error") },
            )
        };

        let grace = self.grace;
        tokio::select! {
            result = servers => {
                result?;
            }
            _ = async {
                shutdown.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!("Connections still open after {:?}, stopping anyway", grace);
            }
        }

        info!("Skiff server stopped");
        Ok(())
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    let socket_addr: SocketAddr = addr.parse().context("Failed to parse socket address")?;
    TcpListener::bind(&socket_addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use skiff_core::ObjectStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_fs_store() {
        let temp = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            root: Some(temp.path().join("bucket")),
            ..Default::default()
        };
        let store = open_store(&config).await.unwrap();
        store.healthy().await.unwrap();
        assert!(temp.path().join("bucket").is_dir());
    }

    #[tokio::test]
    async fn test_fs_store_requires_root() {
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            root: None,
            ..Default::default()
        };
        assert!(open_store(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_local_notifier_without_endpoint() {
        let server = SkiffServer::with_store(
            &SkiffConfig::default(),
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
        )
        .unwrap();
        assert!(server.bridge.is_none());

        server.state().notifier.notify();
        assert_eq!(server.state().broker.published(), 1);
    }

    #[tokio::test]
    async fn test_thumbnail_cache_on_disk() {
        let temp = TempDir::new().unwrap();
        let mut config = SkiffConfig::default();
        config.storage.thumbnail_root = Some(temp.path().join("thumbs"));

        let cache = open_thumbnail_cache(&config.storage).await.unwrap();
        cache.healthy().await.unwrap();
        assert!(temp.path().join("thumbs").is_dir());

        let server = SkiffServer::from_config(&config, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(server.state().broker.published(), 0);
    }

    #[tokio::test]
    async fn test_admin_app_serves_metrics() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let server = SkiffServer::with_store(
            &SkiffConfig::default(),
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
        )
        .unwrap();

        let response = server
            .build_app()
            .oneshot(Request::get("/files/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .build_admin_app()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"http_requests_total{code="200",method="GET"} 1"#));
        assert!(text.contains("skiff_broker_subscribers 0"));
    }
}
