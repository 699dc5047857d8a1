//! Archive extraction into the object store.
//!
//! `docs/bundle.zip` is unpacked under `docs/bundle/`. Extraction refuses to
//! overwrite: if anything already exists at the target the archive is left
//! alone.

use bytes::Bytes;
use flate2::read::GzDecoder;
use skiff_core::directory::{archive_suffix, normalize_key};
use skiff_core::storage::object_key;
use skiff_core::{ObjectStore, Result, SharedStore, SkiffError};
use std::io::{Cursor, Read};
use std::path::{Component, Path};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on one extraction
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

/// A regular file read out of an archive
struct ArchiveFile {
    path: String,
    data: Vec<u8>,
}

#[derive(Clone)]
pub struct Extractor {
    store: SharedStore,
    timeout: Duration,
}

impl Extractor {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            timeout: EXTRACT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extract the archive at `path` next to itself. Returns the number of
    /// uploaded files.
    ///
    /// # Errors
    ///
    /// Fails for unsupported suffixes, an existing target, unreadable
    /// archives, storage failures, or when the timeout passes
    pub async fn extract(&self, path: &str) -> Result<usize> {
        tokio::time::timeout(self.timeout, self.run(path))
            .await
            .map_err(|_| SkiffError::timeout(format!("extract {} after {:?}", path, self.timeout)))?
    }

    async fn run(&self, path: &str) -> Result<usize> {
        let key = object_key(path)?;
        let suffix = archive_suffix(&key)
            .ok_or_else(|| SkiffError::invalid_input(format!("{} is not an archive", key)))?;

        let target = normalize_key(&key[..key.len() - suffix.len()]).to_string();
        if target.is_empty() || target.ends_with('/') {
            return Err(SkiffError::invalid_input(format!("no target name for {}", key)));
        }
        if self.store.exists(&target).await? || self.store.prefix_exists(&target).await? {
            return Err(SkiffError::invalid_input(format!(
                "extraction target {} already exists",
                target
            )));
        }

        let data = self.store.get(&key).await?;
        let files = tokio::task::spawn_blocking(move || read_archive(suffix, data))
            .await
            .map_err(|e| SkiffError::internal(format!("extraction task failed: {}", e)))??;

        debug!("Archive {} holds {} files", key, files.len());
        let count = files.len();
        for file in files {
            let file_key = format!("{}/{}", target, file.path);
            self.store.put(&file_key, Bytes::from(file.data)).await?;
        }

        info!("Extracted {} files from {} into {}", count, key, target);
        Ok(count)
    }
}

fn read_archive(suffix: &str, data: Bytes) -> Result<Vec<ArchiveFile>> {
    match suffix {
        ".zip" => read_zip(data),
        ".tar" => read_tar(Cursor::new(data)),
        ".tar.gz" | ".tgz" => read_tar(GzDecoder::new(Cursor::new(data))),
        other => Err(SkiffError::archive(format!("unsupported archive type {}", other))),
    }
}

fn read_zip(data: Bytes) -> Result<Vec<ArchiveFile>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| SkiffError::archive(format!("open zip: {}", e)))?;

    let mut files = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| SkiffError::archive(format!("read zip entry {}: {}", index, e)))?;
        if entry.is_dir() {
            continue;
        }
        let Some(path) = entry_key(Path::new(entry.name())) else {
            warn!("Skipping unsafe zip entry {}", entry.name());
            continue;
        };

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.push(ArchiveFile { path, data });
    }
    Ok(files)
}

fn read_tar<R: Read>(reader: R) -> Result<Vec<ArchiveFile>> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| SkiffError::archive(format!("open tar: {}", e)))?;

    let mut files = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| SkiffError::archive(format!("read tar entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw = entry
            .path()
            .map_err(|e| SkiffError::archive(format!("tar entry path: {}", e)))?
            .into_owned();
        let Some(path) = entry_key(&raw) else {
            warn!("Skipping unsafe tar entry {}", raw.display());
            continue;
        };

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        files.push(ArchiveFile { path, data });
    }
    Ok(files)
}

/// Relative object key for an archive entry, or `None` when the entry would
/// escape the target (`..`, absolute paths, drive prefixes).
fn entry_key(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use skiff_core::{Listing, MemoryStore};
    use std::io::Write;
    use std::sync::Arc;

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn extractor(store: &MemoryStore) -> Extractor {
        Extractor::new(Arc::new(store.clone()))
    }

    #[test]
    fn test_entry_key_rejects_escapes() {
        assert_eq!(entry_key(Path::new("a/b.txt")).as_deref(), Some("a/b.txt"));
        assert_eq!(entry_key(Path::new("./a.txt")).as_deref(), Some("a.txt"));
        assert_eq!(entry_key(Path::new("../evil")), None);
        assert_eq!(entry_key(Path::new("/etc/passwd")), None);
        assert_eq!(entry_key(Path::new("a/../../b")), None);
    }

    #[tokio::test]
    async fn test_extract_zip() {
        let store = MemoryStore::new();
        let archive = zip_bytes(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
        store.put("docs/pack.zip", Bytes::from(archive)).await.unwrap();

        let count = extractor(&store).extract("/docs/pack.zip").await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.get("docs/pack/a.txt").await.unwrap(), Bytes::from_static(b"alpha"));
        assert_eq!(store.get("docs/pack/sub/b.txt").await.unwrap(), Bytes::from_static(b"beta"));
    }

    #[tokio::test]
    async fn test_extract_tar_gz() {
        let store = MemoryStore::new();
        let tar = tar_bytes(&[("readme.md", b"# hi"), ("src/main.rs", b"fn main() {}")]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).unwrap();
        store
            .put("release.tar.gz", Bytes::from(encoder.finish().unwrap()))
            .await
            .unwrap();

        let count = extractor(&store).extract("release.tar.gz").await.unwrap();
        assert_eq!(count, 2);
        assert!(store.exists("release/readme.md").await.unwrap());
        assert!(store.exists("release/src/main.rs").await.unwrap());
    }

    #[tokio::test]
    async fn test_extract_plain_tar() {
        let store = MemoryStore::new();
        store
            .put("a/b.tar", Bytes::from(tar_bytes(&[("one.txt", b"1")])))
            .await
            .unwrap();

        assert_eq!(extractor(&store).extract("a/b.tar").await.unwrap(), 1);
        assert_eq!(store.get("a/b/one.txt").await.unwrap(), Bytes::from_static(b"1"));
    }

    #[tokio::test]
    async fn test_extract_refuses_existing_target() {
        let store = MemoryStore::new();
        store
            .put("pack.zip", Bytes::from(zip_bytes(&[("a.txt", b"new")])))
            .await
            .unwrap();
        store.put("pack/a.txt", Bytes::from_static(b"old")).await.unwrap();

        let err = extractor(&store).extract("pack.zip").await.unwrap_err();
        assert!(matches!(err, SkiffError::InvalidInput(_)));
        assert_eq!(store.get("pack/a.txt").await.unwrap(), Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn test_extract_rejects_bad_input() {
        let store = MemoryStore::new();
        store.put("notes.txt", Bytes::from_static(b"text")).await.unwrap();
        store.put("broken.zip", Bytes::from_static(b"not a zip")).await.unwrap();

        let extractor = extractor(&store);
        assert!(matches!(
            extractor.extract("notes.txt").await,
            Err(SkiffError::InvalidInput(_))
        ));
        assert!(matches!(
            extractor.extract("broken.zip").await,
            Err(SkiffError::Archive(_))
        ));
        assert!(extractor.extract("missing.zip").await.unwrap_err().is_not_found());
    }

    /// Store whose downloads never finish
    struct StalledStore;

    #[async_trait]
    impl ObjectStore for StalledStore {
        async fn list(&self, _path: &str) -> Result<Listing> {
            Ok(Listing::default())
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn prefix_exists(&self, _path: &str) -> Result<bool> {
            Ok(false)
        }
        async fn get(&self, _key: &str) -> Result<Bytes> {
            std::future::pending().await
        }
        async fn put(&self, _key: &str, _data: Bytes) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, key: &str) -> Result<()> {
            Err(SkiffError::not_found(key))
        }
        async fn delete_recursive(&self, path: &str) -> Result<usize> {
            Err(SkiffError::not_found(path))
        }
        async fn healthy(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_times_out() {
        let extractor =
            Extractor::new(Arc::new(StalledStore)).with_timeout(Duration::from_secs(5));
        let err = extractor.extract("slow.zip").await.unwrap_err();
        assert!(matches!(err, SkiffError::Timeout(_)));
    }
}
