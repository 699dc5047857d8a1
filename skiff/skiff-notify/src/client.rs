//! Client side of the broker bridge.
//!
//! [`BridgeClient`] forwards local change notifications to the notify service
//! and relays the service's wake-ups into a local [`ChangeBroker`].

use crate::bridge::{LISTEN_PATH, NOTIFY_PATH};
use skiff_core::config::NotifyConfig;
use skiff_core::{ChangeBroker, Result, SkiffError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something that can announce "storage changed".
///
/// Calls never block and never fail; delivery problems are logged by the
/// implementation.
pub trait ChangeNotifier: Send + Sync {
    fn notify(&self);
}

impl ChangeNotifier for ChangeBroker {
    fn notify(&self) {
        self.publish();
    }
}

/// HTTP client for the notify service
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    endpoint: String,
    listen_timeout: Duration,
    notify_timeout: Duration,
    retry_backoff: Duration,
}

impl BridgeClient {
    /// Create a client for the service at `endpoint` (e.g. `http://notify:50051`)
    pub fn new(endpoint: impl Into<String>, config: &NotifyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SkiffError::bridge(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            listen_timeout: config.listen_timeout(),
            notify_timeout: config.notify_timeout(),
            retry_backoff: config.retry_backoff(),
        })
    }

    /// Create a client when an endpoint is configured
    pub fn from_config(config: &NotifyConfig) -> Result<Option<Self>> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(endpoint, config))
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn call(&self, path: &str, timeout: Duration) -> Result<()> {
        let response = self
            .http
            .post(self.url(path))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SkiffError::timeout(format!("{} after {:?}", path, timeout))
                } else {
                    SkiffError::bridge(format!("{}: {}", path, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SkiffError::bridge(format!(
                "{} returned status {}",
                path, status
            )));
        }
        Ok(())
    }

    /// Publish on the remote broker
    pub async fn notify(&self) -> Result<()> {
        self.call(NOTIFY_PATH, self.notify_timeout).await
    }

    /// Block until the remote broker publishes or the listen deadline passes.
    ///
    /// An expired deadline is reported as [`SkiffError::Timeout`].
    pub async fn listen(&self) -> Result<()> {
        self.call(LISTEN_PATH, self.listen_timeout).await
    }

    /// Send a notify in the background, logging failures
    pub fn notify_detached(&self) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.notify().await {
                warn!("Failed to notify {}: {}", client.endpoint, e);
            }
        });
    }

    /// Republish every remote change on `broker` until `cancel` fires.
    ///
    /// An expired long poll is retried at once. Other failures wait for the
    /// retry backoff first.
    pub async fn relay(self, broker: ChangeBroker, cancel: CancellationToken) {
        info!("Relaying changes from {}", self.endpoint);

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.listen() => outcome,
            };

            match outcome {
                Ok(()) => {
                    debug!("Remote change received from {}", self.endpoint);
                    broker.publish();
                }
                Err(SkiffError::Timeout(_)) => {
                    debug!("Listen on {} expired, polling again", self.endpoint);
                }
                Err(e) => {
                    warn!("Listen on {} failed: {}", self.endpoint, e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        info!("Stopped relaying changes from {}", self.endpoint);
    }
}

impl ChangeNotifier for BridgeClient {
    fn notify(&self) {
        self.notify_detached();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NotifyConfig {
        NotifyConfig {
            endpoint: Some("http://127.0.0.1:9/".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_from_config() {
        let client = BridgeClient::from_config(&config()).unwrap().unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9");
        assert_eq!(client.url(NOTIFY_PATH), "http://127.0.0.1:9/v1/notify");

        let none = BridgeClient::from_config(&NotifyConfig::default()).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_broker_notifier_publishes() {
        let broker = ChangeBroker::new();
        let notifier: &dyn ChangeNotifier = &broker;
        notifier.notify();
        assert_eq!(broker.published(), 1);
    }

    #[tokio::test]
    async fn test_relay_stops_on_cancel() {
        let client = BridgeClient::from_config(&config()).unwrap().unwrap();
        let cancel = CancellationToken::new();
        let relay = tokio::spawn(client.relay(ChangeBroker::new(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .expect("relay did not stop")
            .unwrap();
    }
}
