//! Configuration for the Skiff server and notify service.
//!
//! Configuration is read from a TOML file and then overridden by `SKIFF_*`
//! environment variables. Every section has defaults, so an empty file (or
//! no file at all) yields a working single-process setup backed by the
//! in-memory store.
//!
//! # Example
//!
//! ```toml
//! [general]
//! log_level = "info"
//!
//! [server]
//! bind = "0.0.0.0:8080"
//! admin_bind = "0.0.0.0:8090"
//! frontend_url = "https://files.example.com"
//!
//! [storage]
//! backend = "fs"
//! root = "/var/lib/skiff"
//!
//! [notify]
//! endpoint = "http://notify:50051"
//! ```

use crate::error::{Result, SkiffError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

// Environment variable names
pub const ENV_CONFIG_PATH: &str = "SKIFF_CONFIG_PATH";
pub const ENV_LOG_LEVEL: &str = "SKIFF_LOG_LEVEL";
pub const ENV_BIND: &str = "SKIFF_BIND";
pub const ENV_ADMIN_BIND: &str = "SKIFF_ADMIN_BIND";
pub const ENV_FRONTEND_URL: &str = "SKIFF_FRONTEND_URL";
pub const ENV_STORAGE_BACKEND: &str = "SKIFF_STORAGE_BACKEND";
pub const ENV_STORAGE_ROOT: &str = "SKIFF_STORAGE_ROOT";
pub const ENV_NOTIFY_ENDPOINT: &str = "SKIFF_NOTIFY_ENDPOINT";
pub const ENV_NOTIFY_BIND: &str = "SKIFF_NOTIFY_BIND";
pub const ENV_WEBHOOK_TOKEN_FILE: &str = "SKIFF_WEBHOOK_TOKEN_FILE";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkiffConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub notify: NotifyConfig,
}

/// General settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

/// Public HTTP/WebSocket listener and streaming session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub admin_bind: String,
    /// Origin allowed for CORS and WebSocket upgrades; any origin when unset
    pub frontend_url: Option<String>,
    /// Largest client message a session accepts, in bytes
    pub max_message_size: usize,
    pub ping_period_ms: u64,
    pub pong_wait_ms: u64,
    pub write_wait_ms: u64,
    pub list_timeout_ms: u64,
    /// Deadline of one archive extraction
    pub extract_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Fs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: Option<PathBuf>,
    /// Directory caching rendered thumbnails; kept in memory when unset
    pub thumbnail_root: Option<PathBuf>,
}

/// Broker bridge settings, shared by the server (client side) and the
/// notify service (server side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Base URL of the notify service. When unset the server publishes on its
    /// own broker only.
    pub endpoint: Option<String>,
    /// Deadline of one listen long poll
    pub listen_timeout_secs: u64,
    /// Pause after a failed listen before retrying
    pub retry_backoff_ms: u64,
    /// Deadline of one notify call
    pub notify_timeout_ms: u64,
    /// Listener of the notify service itself
    pub bind: String,
    pub webhook_token_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            admin_bind: "127.0.0.1:8090".to_string(),
            frontend_url: None,
            max_message_size: 512,
            ping_period_ms: 54_000,
            pong_wait_ms: 60_000,
            write_wait_ms: 10_000,
            list_timeout_ms: 5_000,
            extract_timeout_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            root: None,
            thumbnail_root: None,
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            listen_timeout_secs: 30,
            retry_backoff_ms: 1_000,
            notify_timeout_ms: 5_000,
            bind: "127.0.0.1:50051".to_string(),
            webhook_token_file: None,
        }
    }
}

impl ServerConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl NotifyConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "fs" | "filesystem" => Ok(Self::Fs),
            _ => Err(SkiffError::Config(format!(
                "Invalid storage backend '{}'. Must be one of: memory, fs",
                s
            ))),
        }
    }
}

impl SkiffConfig {
    /// Load configuration from `path` (or `SKIFF_CONFIG_PATH`) when given,
    /// defaults otherwise. Environment overrides and validation always apply.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration is invalid
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from);
        match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from_path(&path).await,
            None => {
                debug!("No configuration file given, using defaults");
                let mut config = Self::default();
                config.merge_env_vars()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SkiffError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_toml(&content)?;

        // Apply environment variable overrides
        config.merge_env_vars()?;

        // Validate the configuration
        config.validate()?;

        info!("Configuration loaded successfully from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text without env overrides
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SkiffError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a specific path atomically
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written
    pub async fn save_to_path(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| SkiffError::Config(format!("Failed to serialize config: {}", e)))?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("toml.tmp");

        tokio::fs::write(&temp_path, content)
            .await
            .map_err(|e| SkiffError::Config(format!("Failed to write config file: {}", e)))?;

        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| SkiffError::Config(format!("Failed to rename config file: {}", e)))?;

        info!("Configuration saved successfully to {}", path.display());
        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(SkiffError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.general.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let server = &self.server;
        if server.max_message_size == 0 {
            return Err(SkiffError::Config(
                "max_message_size must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("ping_period_ms", server.ping_period_ms),
            ("pong_wait_ms", server.pong_wait_ms),
            ("write_wait_ms", server.write_wait_ms),
            ("list_timeout_ms", server.list_timeout_ms),
            ("extract_timeout_secs", server.extract_timeout_secs),
        ] {
            if value == 0 {
                return Err(SkiffError::Config(format!("{} must be greater than 0", name)));
            }
        }

        // Pings must go out before the read deadline expires
        if server.ping_period_ms >= server.pong_wait_ms {
            return Err(SkiffError::Config(format!(
                "ping_period_ms ({}) must be less than pong_wait_ms ({})",
                server.ping_period_ms, server.pong_wait_ms
            )));
        }

        if self.storage.backend == StorageBackend::Fs && self.storage.root.is_none() {
            return Err(SkiffError::Config(
                "storage root must be set for the fs backend".to_string(),
            ));
        }

        if self.notify.listen_timeout_secs == 0 || self.notify.notify_timeout_ms == 0 {
            return Err(SkiffError::Config(
                "notify timeouts must be greater than 0".to_string(),
            ));
        }

        if let Some(endpoint) = &self.notify.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(SkiffError::Config(format!(
                    "notify endpoint '{}' must be an http(s) URL",
                    endpoint
                )));
            }
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    /// Merge environment variable overrides into the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    pub fn merge_env_vars(&mut self) -> Result<()> {
        debug!("Merging environment variable overrides");

        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            debug!("Overriding log_level from environment: {}", log_level);
            self.general.log_level = log_level;
        }

        if let Ok(bind) = std::env::var(ENV_BIND) {
            debug!("Overriding server bind from environment: {}", bind);
            self.server.bind = bind;
        }

        if let Ok(admin_bind) = std::env::var(ENV_ADMIN_BIND) {
            debug!("Overriding admin bind from environment: {}", admin_bind);
            self.server.admin_bind = admin_bind;
        }

        if let Ok(frontend_url) = std::env::var(ENV_FRONTEND_URL) {
            debug!("Overriding frontend URL from environment: {}", frontend_url);
            self.server.frontend_url = Some(frontend_url);
        }

        if let Ok(backend) = std::env::var(ENV_STORAGE_BACKEND) {
            debug!("Overriding storage backend from environment: {}", backend);
            self.storage.backend = backend.parse()?;
        }

        if let Ok(root) = std::env::var(ENV_STORAGE_ROOT) {
            debug!("Overriding storage root from environment: {}", root);
            self.storage.root = Some(PathBuf::from(root));
        }

        if let Ok(endpoint) = std::env::var(ENV_NOTIFY_ENDPOINT) {
            debug!("Overriding notify endpoint from environment: {}", endpoint);
            self.notify.endpoint = Some(endpoint);
        }

        if let Ok(bind) = std::env::var(ENV_NOTIFY_BIND) {
            debug!("Overriding notify bind from environment: {}", bind);
            self.notify.bind = bind;
        }

        if let Ok(token_file) = std::env::var(ENV_WEBHOOK_TOKEN_FILE) {
            debug!("Overriding webhook token file from environment");
            self.notify.webhook_token_file = Some(PathBuf::from(token_file));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SkiffConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.server.max_message_size, 512);
        assert_eq!(config.server.ping_period(), Duration::from_secs(54));
        assert_eq!(config.server.pong_wait(), Duration::from_secs(60));
        assert_eq!(config.notify.retry_backoff(), Duration::from_secs(1));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SkiffConfig::from_toml(
            r#"
            [server]
            bind = "0.0.0.0:9000"

            [storage]
            backend = "fs"
            root = "/srv/bucket"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.pong_wait_ms, 60_000);
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.root, Some(PathBuf::from("/srv/bucket")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SkiffConfig::default();
        config.general.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = SkiffConfig::default();
        config.server.ping_period_ms = config.server.pong_wait_ms;
        assert!(config.validate().is_err());

        let mut config = SkiffConfig::default();
        config.storage.backend = StorageBackend::Fs;
        assert!(config.validate().is_err());

        let mut config = SkiffConfig::default();
        config.notify.endpoint = Some("notify:50051".to_string());
        assert!(config.validate().is_err());

        let mut config = SkiffConfig::default();
        config.server.write_wait_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SkiffConfig::default();
        config.server.extract_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("FS".parse::<StorageBackend>().unwrap(), StorageBackend::Fs);
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("s4".parse::<StorageBackend>().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("skiff.toml");

        let mut config = SkiffConfig::default();
        config.server.frontend_url = Some("https://files.example.com".to_string());
        config.notify.endpoint = Some("http://notify:50051".to_string());
        config.save_to_path(&path).await.unwrap();

        let loaded = SkiffConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let result = SkiffConfig::load_from_path(&temp.path().join("missing.toml")).await;
        assert!(matches!(result, Err(SkiffError::Config(_))));
    }
}
