//! Process-wide change broker.
//!
//! A [`ChangeBroker`] broadcasts a payload-less wake-up to every subscriber
//! that is waiting at the moment of [`ChangeBroker::publish`]. Nothing is
//! queued: a publish with no waiters is dropped, and a subscriber that was busy
//! while a publish happened only wakes on the next one. Consumers re-read the
//! current storage state after each wake-up, so a missed signal only delays a
//! refresh.
//!
//! # Example
//!
//! ```
//! use skiff_core::broker::ChangeBroker;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let broker = ChangeBroker::new();
//! let subscription = broker.subscribe();
//! let cancel = CancellationToken::new();
//!
//! let waiter = tokio::spawn(async move { subscription.wait(&cancel).await });
//! tokio::task::yield_now().await;
//!
//! broker.publish();
//! # let _ = waiter.await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct BrokerInner {
    notify: Notify,
    subscribers: AtomicUsize,
    published: AtomicU64,
}

/// Broadcast wake-up shared by every streaming session of a process.
///
/// Cloning is cheap and yields a handle to the same broker.
#[derive(Clone)]
pub struct ChangeBroker {
    inner: Arc<BrokerInner>,
}

impl ChangeBroker {
    /// Create a new broker with no subscribers
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                notify: Notify::new(),
                subscribers: AtomicUsize::new(0),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Register a waiter. The handle is released when dropped.
    pub fn subscribe(&self) -> Subscription {
        let count = self.inner.subscribers.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Broker subscription registered ({} active)", count);

        Subscription {
            inner: self.inner.clone(),
        }
    }

    /// Wake every subscriber currently blocked in [`Subscription::wait`].
    ///
    /// Never blocks. Stores no permit, so waits that begin afterwards are not
    /// released by this call.
    pub fn publish(&self) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_waiters();
    }

    /// Number of live subscription handles
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.load(Ordering::Acquire)
    }

    /// Total number of publishes since creation
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

impl Default for ChangeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBroker")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .finish()
    }
}

/// Wait token held by one consumer for the lifetime of its wait loop.
pub struct Subscription {
    inner: Arc<BrokerInner>,
}

impl Subscription {
    /// Block until the next publish or until `cancel` fires.
    ///
    /// Returns `true` when woken by a publish and `false` when cancelled.
    pub async fn wait(&self, cancel: &CancellationToken) -> bool {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before polling so a publish racing the first poll still
        // reaches this waiter.
        notified.as_mut().enable();

        tokio::select! {
            _ = &mut notified => true,
            _ = cancel.cancelled() => false,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let remaining = self.inner.subscribers.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!("Broker subscription released ({} active)", remaining);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Spawn `n` waiters and give them time to block.
    async fn spawn_waiters(
        broker: &ChangeBroker,
        n: usize,
        cancel: &CancellationToken,
    ) -> Vec<tokio::task::JoinHandle<bool>> {
        let handles = (0..n)
            .map(|_| {
                let subscription = broker.subscribe();
                let cancel = cancel.clone();
                tokio::spawn(async move { subscription.wait(&cancel).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handles
    }

    #[tokio::test]
    async fn test_publish_wakes_all_waiters() {
        for n in [0usize, 1, 5, 32] {
            let broker = ChangeBroker::new();
            let cancel = CancellationToken::new();
            let handles = spawn_waiters(&broker, n, &cancel).await;

            broker.publish();

            for handle in handles {
                let woken = timeout(Duration::from_secs(1), handle)
                    .await
                    .expect("waiter was not released")
                    .unwrap();
                assert!(woken);
            }
            assert_eq!(broker.subscriber_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_publish_without_waiters_is_dropped() {
        let broker = ChangeBroker::new();
        broker.publish();
        broker.publish();

        let subscription = broker.subscribe();
        let cancel = CancellationToken::new();
        let result = timeout(Duration::from_millis(100), subscription.wait(&cancel)).await;
        assert!(result.is_err(), "wait must not observe an earlier publish");
        assert_eq!(broker.published(), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_not_woken() {
        let broker = ChangeBroker::new();
        let cancel = CancellationToken::new();
        let early = spawn_waiters(&broker, 1, &cancel).await;

        broker.publish();

        let late = broker.subscribe();
        let result = timeout(Duration::from_millis(100), late.wait(&cancel)).await;
        assert!(result.is_err());

        for handle in early {
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_wait() {
        let broker = ChangeBroker::new();
        let subscription = broker.subscribe();
        let cancel = CancellationToken::new();

        let child = cancel.child_token();
        let waiter = tokio::spawn(async move { subscription.wait(&child).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let woken = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(!woken);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_is_reusable() {
        let broker = ChangeBroker::new();
        let subscription = Arc::new(broker.subscribe());
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            let sub = subscription.clone();
            let cancel = cancel.clone();
            let waiter = tokio::spawn(async move { sub.wait(&cancel).await });
            tokio::time::sleep(Duration::from_millis(20)).await;
            broker.publish();
            assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        }
        assert_eq!(broker.subscriber_count(), 1);
    }
}
