//! Typed view over the attribute bag of a file record.
//!
//! The repository stores extended properties as an opaque JSON object so
//! the schema can evolve without migrations. Only this module knows the
//! keys. Decoding is lenient per field: a malformed value is dropped rather
//! than failing the whole record, and keys this version does not know are
//! carried through untouched on write.

use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Sparse key-value bag persisted alongside a file record.
pub type AttributeBag = Map<String, Value>;

const FOLDER_PATH: &str = "folder_path";
const ACCESS_LEVEL: &str = "access_level";
const EXPIRES_AT: &str = "expires_at";
const IS_PUBLIC: &str = "is_public";
const TAGS: &str = "tags";
const METADATA: &str = "metadata";
const THUMBNAIL_PATH: &str = "thumbnail_path";
const VERSIONS: &str = "versions";

/// Who may read a file through the public surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    #[default]
    Private,
    Shared,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Shared => "shared",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            other => Err(Error::validation(format!(
                "invalid access level '{other}' (expected public, private or shared)"
            ))),
        }
    }
}

/// Coarse content category derived from the MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    #[default]
    Other,
}

impl FileCategory {
    pub fn from_mime(mime: &str) -> Self {
        let essence = mime.split(';').next().unwrap_or_default().trim();
        let (top, sub) = essence.split_once('/').unwrap_or((essence, ""));
        match top {
            "image" => Self::Image,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "text" => Self::Document,
            "application"
                if sub == "pdf"
                    || sub == "msword"
                    || sub == "rtf"
                    || sub.starts_with("vnd.openxmlformats-officedocument")
                    || sub.starts_with("vnd.ms-")
                    || sub.starts_with("vnd.oasis.opendocument") =>
            {
                Self::Document
            },
            _ => Self::Other,
        }
    }
}

/// Descriptive metadata stored under the `metadata` key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(default)]
    pub category: FileCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Playback length in seconds, for audio and video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

impl FileMetadata {
    pub fn for_mime(mime: &str) -> Self {
        Self {
            category: FileCategory::from_mime(mime),
            ..Self::default()
        }
    }
}

/// Extended properties of a file.
///
/// `access_level == Public` and `is_public` are kept in step by every
/// mutation in this module.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FileExtras {
    pub folder_path: Option<String>,
    pub access_level: AccessLevel,
    /// Unix seconds after which public access is refused.
    pub expires_at: Option<i64>,
    pub is_public: bool,
    pub tags: Vec<String>,
    pub metadata: Option<FileMetadata>,
    pub thumbnail_path: Option<String>,
    /// Ids of prior versions, oldest first.
    pub versions: Vec<String>,
}

impl FileExtras {
    /// Decodes the known keys of `bag`.
    pub fn from_bag(bag: &AttributeBag) -> Self {
        let is_public = field::<bool>(bag, IS_PUBLIC).unwrap_or(false);
        let access_level = field::<AccessLevel>(bag, ACCESS_LEVEL).unwrap_or(if is_public {
            AccessLevel::Public
        } else {
            AccessLevel::Private
        });

        Self {
            folder_path: field(bag, FOLDER_PATH),
            access_level,
            expires_at: field(bag, EXPIRES_AT),
            is_public,
            tags: field(bag, TAGS).unwrap_or_default(),
            metadata: field(bag, METADATA),
            thumbnail_path: field(bag, THUMBNAIL_PATH),
            versions: field(bag, VERSIONS).unwrap_or_default(),
        }
    }

    /// Writes the known keys into `bag`, removing those that are unset.
    ///
    /// Keys not owned by this type are left as they are.
    pub fn write_to(&self, bag: &mut AttributeBag) {
        put(bag, FOLDER_PATH, self.folder_path.as_ref());
        put(bag, ACCESS_LEVEL, Some(&self.access_level));
        put(bag, EXPIRES_AT, self.expires_at.as_ref());
        put(bag, IS_PUBLIC, Some(&self.is_public));
        put(bag, TAGS, (!self.tags.is_empty()).then_some(&self.tags));
        put(bag, METADATA, self.metadata.as_ref());
        put(bag, THUMBNAIL_PATH, self.thumbnail_path.as_ref());
        put(
            bag,
            VERSIONS,
            (!self.versions.is_empty()).then_some(&self.versions),
        );
    }

    /// Encodes into a fresh bag.
    pub fn to_bag(&self) -> AttributeBag {
        let mut bag = AttributeBag::new();
        self.write_to(&mut bag);
        bag
    }

    /// Sets the access level and the derived `is_public` flag together.
    pub fn set_access_level(&mut self, level: AccessLevel) {
        self.access_level = level;
        self.is_public = level == AccessLevel::Public;
    }

    /// Applies a patch; fields absent from the patch are untouched.
    pub fn merge(&mut self, patch: &ExtrasPatch) {
        if let Some(folder_path) = &patch.folder_path {
            self.folder_path = Some(folder_path.clone());
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = expires_at;
        }
        if let Some(tags) = &patch.tags {
            self.tags.clone_from(tags);
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = Some(metadata.clone());
        }

        match (patch.access_level, patch.is_public) {
            (Some(level), _) => self.set_access_level(level),
            (None, Some(true)) => self.set_access_level(AccessLevel::Public),
            (None, Some(false)) if self.access_level == AccessLevel::Public => {
                self.set_access_level(AccessLevel::Private);
            },
            (None, Some(false)) => self.is_public = false,
            (None, None) => {},
        }
    }

    /// True when `expires_at` is set and not after `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Caller-settable subset of [`FileExtras`].
///
/// `thumbnail_path` and `versions` are owned by the file manager and cannot
/// be patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtrasPatch {
    pub folder_path: Option<String>,
    pub access_level: Option<AccessLevel>,
    /// `Some(None)` clears the expiration.
    pub expires_at: Option<Option<i64>>,
    pub is_public: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<FileMetadata>,
}

impl ExtrasPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn folder_path(mut self, folder_path: impl Into<String>) -> Self {
        self.folder_path = Some(folder_path.into());
        self
    }

    #[must_use]
    pub fn access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = Some(level);
        self
    }

    #[must_use]
    pub fn public(mut self, is_public: bool) -> Self {
        self.is_public = Some(is_public);
        self
    }

    #[must_use]
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn expires_at(mut self, expires_at: Option<i64>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: FileMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

fn field<T: DeserializeOwned>(bag: &AttributeBag, key: &str) -> Option<T> {
    let value = bag.get(key)?;
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(key, error = %e, "Ignoring malformed attribute");
            None
        },
    }
}

fn put<T: Serialize>(bag: &mut AttributeBag, key: &str, value: Option<&T>) {
    match value.and_then(|v| serde_json::to_value(v).ok()) {
        Some(v) => {
            bag.insert(key.to_string(), v);
        },
        None => {
            bag.remove(key);
        },
    }
}
