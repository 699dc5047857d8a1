//! Object store laid out as plain files under a root directory.

use super::{ObjectStore, object_key};
use crate::directory::{Listing, ObjectInfo, display_path, normalize_key};
use crate::error::{Result, SkiffError};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};
use uuid::Uuid;

const TEMP_SUFFIX: &str = ".skiff-tmp";

/// Object store backed by a local directory. Each key maps to a file at the
/// same relative path.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the directory if missing.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            SkiffError::storage(format!("create root {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn directory(&self, path: &str) -> Result<PathBuf> {
        let key = normalize_key(path);
        if key.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.resolve(&object_key(key)?))
        }
    }

    /// Remove empty parent directories of `path`, stopping at the root.
    async fn prune_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root.as_path() || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir fails on non-empty directories, which ends the walk
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn etag_for(metadata: &std::fs::Metadata) -> String {
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seed = format!("{}:{}", metadata.len(), modified);
    blake3::hash(seed.as_bytes()).to_hex()[..16].to_string()
}

fn storage_error(action: &str, key: &str, err: std::io::Error) -> SkiffError {
    if err.kind() == ErrorKind::NotFound {
        SkiffError::not_found(key.to_string())
    } else {
        SkiffError::storage(format!("{} {}: {}", action, key, err))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn list(&self, path: &str) -> Result<Listing> {
        let dir = self.directory(path)?;
        let mut listing = Listing {
            path: display_path(path),
            ..Default::default()
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                return Ok(listing);
            }
            Err(e) => return Err(storage_error("list", path, e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                listing.directories.push(name);
            } else if metadata.is_file() {
                listing.objects.push(ObjectInfo {
                    name,
                    size: metadata.len(),
                    etag: etag_for(&metadata),
                });
            }
        }

        // Match bucket key order, where "a/" sorts after "a-b/".
        listing
            .directories
            .sort_by(|a, b| format!("{}/", a).cmp(&format!("{}/", b)));
        listing.objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = object_key(key)?;
        match tokio::fs::metadata(self.resolve(&key)).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_error("stat", &key, e)),
        }
    }

    async fn prefix_exists(&self, path: &str) -> Result<bool> {
        let dir = self.directory(path)?;
        match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => Ok(entries.next_entry().await?.is_some()),
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                Ok(false)
            }
            Err(e) => Err(storage_error("stat", path, e)),
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let key = object_key(key)?;
        let data = tokio::fs::read(self.resolve(&key))
            .await
            .map_err(|e| storage_error("read", &key, e))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let key = object_key(key)?;
        let target = self.resolve(&key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("create parent of", &key, e))?;
        }

        // Atomic write: write to a temp file private to this call, then rename
        let mut temp = target.clone().into_os_string();
        temp.push(format!(".{}{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
        let temp = PathBuf::from(temp);

        if let Err(e) = tokio::fs::write(&temp, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(storage_error("write", &key, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SkiffError::storage(format!("rename {}: {}", key, e)));
        }

        debug!("fs store: put {} ({} bytes)", key, data.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = object_key(key)?;
        let target = self.resolve(&key);
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| storage_error("delete", &key, e))?;
        self.prune_parents(&target).await;
        Ok(())
    }

    async fn delete_recursive(&self, path: &str) -> Result<usize> {
        let key = object_key(path)?;
        let target = self.resolve(&key);

        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| storage_error("delete", &key, e))?;

        let removed = if metadata.is_dir() {
            let count = count_files(&target).await?;
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|e| storage_error("delete", &key, e))?;
            count
        } else {
            tokio::fs::remove_file(&target)
                .await
                .map_err(|e| storage_error("delete", &key, e))?;
            1
        };

        self.prune_parents(&target).await;
        debug!("fs store: removed {} objects under {}", removed, key);
        Ok(removed)
    }

    async fn healthy(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.root).await.map_err(|e| {
            warn!("Storage root {} unavailable: {}", self.root.display(), e);
            SkiffError::storage(format!("root {}: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(SkiffError::storage(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}

async fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                count += 1;
            }
        }
    }
    Ok(count)
}
