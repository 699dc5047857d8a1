//! On-demand thumbnails for image entries.
//!
//! Listings reference `thumbnails/<etag>/<key>`. The first request for a
//! reference renders the image at `key` into a PNG that fits 122x72 and stores
//! it in the thumbnail cache; later requests are served from the cache. A
//! reference whose etag no longer matches the object is not found, so a
//! cached thumbnail always belongs to the version it names.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use skiff_core::directory::thumbnail_supported;
use skiff_core::storage::object_key;
use skiff_core::{ObjectStore, Result, SharedStore, SkiffError};
use std::io::Cursor;
use tracing::{debug, info};

pub const THUMBNAIL_WIDTH: u32 = 122;
pub const THUMBNAIL_HEIGHT: u32 = 72;

#[derive(Clone)]
pub struct Thumbnailer {
    store: SharedStore,
    cache: SharedStore,
}

impl Thumbnailer {
    /// Render images from `store`, caching results in `cache`
    pub fn new(store: SharedStore, cache: SharedStore) -> Self {
        Self { store, cache }
    }

    /// PNG thumbnail of the object at `key`, version `etag`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for non-image keys, malformed etags and undecodable
    /// images; `NotFound` when the object is gone or has changed since the
    /// reference was issued
    pub async fn thumbnail(&self, etag: &str, key: &str) -> Result<Bytes> {
        let key = object_key(key)?;
        if !thumbnail_supported(&key) {
            return Err(SkiffError::invalid_input(format!("{} is not an image", key)));
        }
        if etag.is_empty() || !etag.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SkiffError::invalid_input(format!("malformed etag '{}'", etag)));
        }

        let cache_key = format!("{}/{}.png", etag, key);
        match self.cache.get(&cache_key).await {
            Ok(png) => {
                debug!("Thumbnail cache hit for {}", cache_key);
                return Ok(png);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if self.current_etag(&key).await? != etag {
            return Err(SkiffError::not_found(format!("{} at version {}", key, etag)));
        }

        let source = self.store.get(&key).await?;
        let png = tokio::task::spawn_blocking(move || render(&source))
            .await
            .map_err(|e| SkiffError::internal(format!("thumbnail task failed: {}", e)))??;

        self.cache.put(&cache_key, png.clone()).await?;
        info!("Rendered thumbnail for {} ({} bytes)", key, png.len());
        Ok(png)
    }

    async fn current_etag(&self, key: &str) -> Result<String> {
        let (dir, name) = key.rsplit_once('/').unwrap_or(("", key));
        self.store
            .list(dir)
            .await?
            .objects
            .into_iter()
            .find(|object| object.name == name)
            .map(|object| object.etag)
            .ok_or_else(|| SkiffError::not_found(key.to_string()))
    }
}

/// Decode an image and re-encode it as a PNG fitting the thumbnail box.
/// Images already inside the box keep their size.
fn render(data: &[u8]) -> Result<Bytes> {
    let image = image::load_from_memory(data)
        .map_err(|e| SkiffError::invalid_input(format!("decode image: {}", e)))?;

    let image = if image.width() > THUMBNAIL_WIDTH || image.height() > THUMBNAIL_HEIGHT {
        image.resize(THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT, FilterType::Lanczos3)
    } else {
        image
    };

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(image.to_rgba8())
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| SkiffError::internal(format!("encode thumbnail: {}", e)))?;
    Ok(Bytes::from(out.into_inner()))
}
