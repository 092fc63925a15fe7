//! File records as persisted and as returned to callers.

use super::extras::{AttributeBag, FileExtras};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The persisted unit of storage.
///
/// The repository treats `attributes` as opaque; only
/// [`FileExtras`] interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    /// Logical key in the byte store.
    pub path: String,
    /// MIME type.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Bytes written to the byte store at `path`.
    pub size: i64,
    pub storage_provider: String,
    pub bucket: String,
    pub endpoint: String,
    pub object_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub attributes: AttributeBag,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Decodes the attribute bag.
    pub fn extras(&self) -> FileExtras {
        FileExtras::from_bag(&self.attributes)
    }

    /// Re-encodes `extras` into the attribute bag.
    pub fn set_extras(&mut self, extras: &FileExtras) {
        extras.write_to(&mut self.attributes);
    }
}

/// Public links for a file, present only when it is public.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessUrls {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// A record with its decoded extras and derived links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFile {
    #[serde(flatten)]
    pub record: FileRecord,
    #[serde(skip)]
    pub extras: FileExtras,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<AccessUrls>,
}

impl StoredFile {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn thumbnail_path(&self) -> Option<&str> {
        self.extras.thumbnail_path.as_deref()
    }

    pub fn versions(&self) -> &[String] {
        &self.extras.versions
    }
}
