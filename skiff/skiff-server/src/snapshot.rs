//! Directory snapshots served to streaming sessions and HTTP clients.

use skiff_core::{Directory, ObjectStore, Result, SharedStore, SkiffError};
use std::time::Duration;
use tracing::debug;

/// Turns storage listings into decorated [`Directory`] snapshots.
///
/// Stateless apart from its store handle: the same path over the same storage
/// state always yields an equal snapshot.
#[derive(Clone)]
pub struct Snapshotter {
    store: SharedStore,
    timeout: Duration,
}

impl Snapshotter {
    pub fn new(store: SharedStore, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// List `path` and decorate every entry.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Timeout`] when the listing takes longer than the
    /// configured timeout, or the storage error otherwise
    pub async fn snapshot(&self, path: &str) -> Result<Directory> {
        let listing = tokio::time::timeout(self.timeout, self.store.list(path))
            .await
            .map_err(|_| SkiffError::timeout(format!("list {} after {:?}", path, self.timeout)))??;

        debug!(
            "Snapshot of {}: {} directories, {} files",
            listing.path,
            listing.directories.len(),
            listing.objects.len()
        );
        Ok(Directory::from_listing(listing))
    }
}
