//! Filesystem-backed byte store.
//!
//! Objects live under a base directory at their logical path. Writes go to a
//! sibling temporary file first and are renamed into place, so a reader never
//! observes a half-written object.

use super::backend::{BoxReader, ByteStore};
use super::validation::object_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Filesystem-backed byte store.
///
/// # Thread Safety
///
/// `FilesystemByteStore` is `Clone` and can be shared across tasks; every
/// operation goes through `tokio::fs`.
#[derive(Clone, Debug)]
pub struct FilesystemByteStore {
    base_dir: PathBuf,
}

impl FilesystemByteStore {
    /// Creates or opens the store rooted at `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();

        std::fs::create_dir_all(&base_dir).with_context(|| {
            format!("Failed to create objects directory: {}", base_dir.display())
        })?;

        Ok(Self { base_dir })
    }

    /// Root directory of the store.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn temp_path(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(".{name}.{}.partial", uuid::Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl ByteStore for FilesystemByteStore {
    async fn put(&self, path: &str, mut reader: BoxReader) -> Result<u64> {
        let file_path = object_path(&self.base_dir, path)?;

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create parent directories for: {path}"))?;
        }

        let temp = Self::temp_path(&file_path);
        let write = async {
            let mut file = fs::File::create(&temp)
                .await
                .with_context(|| format!("Failed to create object: {path}"))?;
            let written = tokio::io::copy(&mut reader, &mut file)
                .await
                .with_context(|| format!("Failed to write object: {path}"))?;
            file.flush().await?;
            fs::rename(&temp, &file_path)
                .await
                .with_context(|| format!("Failed to commit object: {path}"))?;
            anyhow::Ok(written)
        };

        match write.await {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                Err(e)
            },
        }
    }

    async fn get_stream(&self, path: &str) -> Result<Option<BoxReader>> {
        let file_path = object_path(&self.base_dir, path)?;

        match fs::File::open(&file_path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to open object: {path}")),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let file_path = object_path(&self.base_dir, path)?;

        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to delete object: {path}")),
        }
    }

    async fn size(&self, path: &str) -> Result<Option<u64>> {
        let file_path = object_path(&self.base_dir, path)?;

        match fs::metadata(&file_path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to stat object: {path}")),
        }
    }
}
