//! Object store abstraction.
//!
//! Keys are slash-separated paths without a leading slash (`docs/report.pdf`).
//! Directories are implicit: a listing groups keys by the next `/` after the
//! requested prefix, the way S3 does with a delimiter.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::directory::Listing;
use crate::error::{Result, SkiffError};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Storage collaborator consumed by the HTTP routes, the snapshotter and the
/// archive extractor.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Non-recursive listing of the directory at `path`.
    async fn list(&self, path: &str) -> Result<Listing>;

    /// Whether an object exists at exactly `key`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Whether any object exists below the directory `path`.
    async fn prefix_exists(&self, path: &str) -> Result<bool>;

    /// Read a whole object.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Create or replace an object.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Delete a single object.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete the object at `path` and everything below it. Returns the
    /// number of removed objects.
    async fn delete_recursive(&self, path: &str) -> Result<usize>;

    /// Check that the backend is reachable.
    async fn healthy(&self) -> Result<()>;
}

/// Shared handle to a storage backend
pub type SharedStore = Arc<dyn ObjectStore>;

/// Validate and normalize an object key.
pub fn object_key(path: &str) -> Result<String> {
    let key = crate::directory::normalize_key(path);
    if key.is_empty() {
        return Err(SkiffError::invalid_input("empty object key"));
    }
    if key
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(SkiffError::invalid_input(format!("invalid object key '{}'", path)));
    }
    Ok(key.to_string())
}
