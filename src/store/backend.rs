//! Backend trait for the byte store.
//!
//! Defines the narrow interface the file manager needs from an object store,
//! enabling pluggable storage (filesystem, memory, S3, etc.).

use anyhow::Result;
use async_trait::async_trait;
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Backend trait for raw byte storage addressed by logical path.
///
/// All backends must be thread-safe (`Send + Sync`) for use with tokio.
/// Paths are validated by the backend; `..`, absolute and empty paths are
/// rejected.
///
/// # Example
///
/// ```ignore
/// use filequota::store::{ByteStore, MemoryByteStore};
///
/// let store = MemoryByteStore::new();
/// store.put_bytes("uploads/logo.png", &image_bytes).await?;
/// let data = store.get("uploads/logo.png").await?;
/// ```
#[async_trait]
pub trait ByteStore: Send + Sync + 'static {
    /// Stores everything `reader` yields at `path`, replacing any previous
    /// object.
    ///
    /// # Returns
    /// The number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the write fails. A failed
    /// put leaves no partial object behind.
    async fn put(&self, path: &str, reader: BoxReader) -> Result<u64>;

    /// Opens the object at `path` for streaming.
    ///
    /// # Returns
    /// * `Ok(Some(reader))` - Object found
    /// * `Ok(None)` - Object not found
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the object cannot be opened.
    async fn get_stream(&self, path: &str) -> Result<Option<BoxReader>>;

    /// Deletes the object at `path`.
    ///
    /// # Returns
    /// * `Ok(true)` - Object existed and was deleted
    /// * `Ok(false)` - Object did not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or deletion fails.
    async fn delete(&self, path: &str) -> Result<bool>;

    /// Size of the object in bytes, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or metadata cannot be read.
    async fn size(&self, path: &str) -> Result<Option<u64>>;

    /// Stores an in-memory buffer.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    async fn put_bytes(&self, path: &str, data: &[u8]) -> Result<u64> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put(path, reader).await
    }

    /// Reads the whole object into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the read fails.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let Some(mut reader) = self.get_stream(path).await? else {
            return Ok(None);
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(Some(buf))
    }

    /// Checks whether an object exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or metadata cannot be read.
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.size(path).await?.is_some())
    }
}
