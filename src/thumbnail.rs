//! Image derivative generation.
//!
//! No codec ships with this crate; plug one in through
//! [`ThumbnailGenerator`]. Failures are never fatal to the file operation
//! that asked for the thumbnail.

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Produces a downscaled copy of an image.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync + 'static {
    /// Returns encoded thumbnail bytes fitting within `max_width` x
    /// `max_height`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be decoded or encoded.
    async fn create_thumbnail(
        &self,
        data: &[u8],
        name: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<Vec<u8>>;
}

/// Generator used when no codec is configured; always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableThumbnailer;

#[async_trait]
impl ThumbnailGenerator for UnavailableThumbnailer {
    async fn create_thumbnail(
        &self,
        _data: &[u8],
        name: &str,
        _max_width: u32,
        _max_height: u32,
    ) -> Result<Vec<u8>> {
        bail!("no thumbnail generator configured (file '{name}')")
    }
}

/// True for MIME types a thumbnail can be derived from.
pub fn is_image(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    essence.starts_with("image/") && essence != "image/svg+xml"
}

/// Where the thumbnail of the object at `path` is stored.
pub fn thumbnail_path(path: &str) -> String {
    format!("thumbnails/{path}")
}
