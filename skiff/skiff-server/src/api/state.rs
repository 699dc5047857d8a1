//! State shared by the HTTP handlers and WebSocket sessions.

use super::session::{SessionConfig, SessionContext};
use crate::extract::Extractor;
use crate::snapshot::Snapshotter;
use crate::thumbnail::Thumbnailer;
use skiff_core::config::ServerConfig;
use skiff_core::{ChangeBroker, MemoryStore, SharedStore};
use skiff_notify::ChangeNotifier;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub snapshotter: Snapshotter,
    pub extractor: Extractor,
    pub thumbnailer: Thumbnailer,
    /// Wakes this process's sessions
    pub broker: ChangeBroker,
    /// Announces changes made through this process
    pub notifier: Arc<dyn ChangeNotifier>,
    pub session: SessionConfig,
    pub frontend_url: Option<String>,
    /// Root token; every session runs on a child of it
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        config: &ServerConfig,
        broker: ChangeBroker,
        notifier: Arc<dyn ChangeNotifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            snapshotter: Snapshotter::new(store.clone(), config.list_timeout()),
            extractor: Extractor::new(store.clone()).with_timeout(config.extract_timeout()),
            thumbnailer: Thumbnailer::new(store.clone(), Arc::new(MemoryStore::new())),
            store,
            broker,
            notifier,
            session: SessionConfig::from(config),
            frontend_url: config
                .frontend_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string()),
            shutdown,
        }
    }

    /// Keep rendered thumbnails in `cache` instead of memory
    pub fn with_thumbnail_cache(mut self, cache: SharedStore) -> Self {
        self.thumbnailer = Thumbnailer::new(self.store.clone(), cache);
        self
    }

    pub fn session_context(&self) -> SessionContext {
        SessionContext {
            snapshotter: self.snapshotter.clone(),
            extractor: self.extractor.clone(),
            broker: self.broker.clone(),
            notifier: self.notifier.clone(),
            config: self.session.clone(),
        }
    }
}
