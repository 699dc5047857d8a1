//! In-process object store.

use super::{ObjectStore, object_key};
use crate::directory::{Listing, ObjectInfo, directory_prefix, display_path};
use crate::error::{Result, SkiffError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
}

/// Object store kept in memory, ordered by key like an S3 bucket.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list(&self, path: &str) -> Result<Listing> {
        let prefix = directory_prefix(path);
        let objects = self.objects.read();

        let mut listing = Listing {
            path: display_path(path),
            ..Default::default()
        };

        for (key, object) in objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            if rest.is_empty() {
                continue;
            }

            match rest.split_once('/') {
                Some((dir, _)) => {
                    if listing.directories.last().map(String::as_str) != Some(dir) {
                        listing.directories.push(dir.to_string());
                    }
                }
                None => listing.objects.push(ObjectInfo {
                    name: rest.to_string(),
                    size: object.data.len() as u64,
                    etag: object.etag.clone(),
                }),
            }
        }

        Ok(listing)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = object_key(key)?;
        Ok(self.objects.read().contains_key(&key))
    }

    async fn prefix_exists(&self, path: &str) -> Result<bool> {
        let prefix = directory_prefix(path);
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(&prefix)))
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let key = object_key(key)?;
        self.objects
            .read()
            .get(&key)
            .map(|object| object.data.clone())
            .ok_or_else(|| SkiffError::not_found(key))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let key = object_key(key)?;
        let etag = blake3::hash(&data).to_hex()[..16].to_string();
        debug!("memory store: put {} ({} bytes)", key, data.len());
        self.objects.write().insert(key, StoredObject { data, etag });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = object_key(key)?;
        match self.objects.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(SkiffError::not_found(key)),
        }
    }

    async fn delete_recursive(&self, path: &str) -> Result<usize> {
        let key = object_key(path)?;
        let prefix = format!("{}/", key);

        let mut objects = self.objects.write();
        let before = objects.len();
        objects.retain(|k, _| k != &key && !k.starts_with(&prefix));
        let removed = before - objects.len();

        if removed == 0 {
            return Err(SkiffError::not_found(key));
        }
        debug!("memory store: removed {} objects under {}", removed, key);
        Ok(removed)
    }

    async fn healthy(&self) -> Result<()> {
        Ok(())
    }
}
