//! File object lifecycle.
//!
//! [`FileManager`] orchestrates create, update, delete, versioning and
//! publishing of files. Every size-increasing write is gated by the
//! [`QuotaManager`](crate::quota::QuotaManager) before bytes reach the
//! byte store.

mod extras;
mod manager;
mod record;
mod url;

#[cfg(test)]
mod tests;

use std::time::Duration;

pub use extras::{AccessLevel, AttributeBag, ExtrasPatch, FileCategory, FileExtras, FileMetadata};
pub use manager::{FileManager, FileStream, FileUpdate, NewFile, PublicUrl};
pub use record::{AccessUrls, FileRecord, StoredFile};
pub use url::{TokenClaims, TokenSigner};

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailSettings {
    pub enabled: bool,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_width: 300,
            max_height: 300,
        }
    }
}

/// Which byte store instance records point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLocation {
    pub provider: String,
    pub bucket: String,
    pub endpoint: String,
}

impl Default for StorageLocation {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            bucket: "default".to_string(),
            endpoint: String::new(),
        }
    }
}

/// Runtime settings for [`FileManager`].
#[derive(Debug, Clone)]
pub struct FileSettings {
    pub thumbnail: ThumbnailSettings,
    pub location: StorageLocation,
    /// Prefix of public links; the token is appended as a path segment.
    pub public_base_url: String,
    /// Key material for public tokens; `None` issues unsigned tokens.
    pub signing_secret: Option<String>,
    /// Used when `generate_public_url` is given a non-positive duration.
    pub default_expiration_hours: i64,
    /// Deadline for each byte store, repository and thumbnail call.
    pub operation_timeout: Duration,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            thumbnail: ThumbnailSettings::default(),
            location: StorageLocation::default(),
            public_base_url: "http://localhost:8080/public".to_string(),
            signing_secret: None,
            default_expiration_hours: 24,
            operation_timeout: Duration::from_secs(30),
        }
    }
}
