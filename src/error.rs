//! Error types for quota and file lifecycle operations.
//!
//! Every public operation of [`QuotaManager`](crate::quota::QuotaManager) and
//! [`FileManager`](crate::file::FileManager) returns [`Result`], so callers can
//! match on the failure kind instead of parsing messages.

/// Result type for filequota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced to callers.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or malformed identifier, or an invalid enum value.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced file or quota record does not exist.
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    /// The write would push the tenant past its quota ceiling.
    #[error(
        "quota exceeded for tenant '{tenant}': requested {requested} bytes, used {used} of {limit}"
    )]
    QuotaExceeded {
        tenant: String,
        requested: i64,
        used: i64,
        limit: i64,
    },

    /// Public access attempted after the file's expiration.
    #[error("file '{id}' expired at {expired_at}")]
    Expired { id: String, expired_at: i64 },

    /// A collaborator (byte store, repository, counter store) failed.
    #[error("{backend} unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },
}

impl Error {
    /// Create a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Create a not found error.
    pub fn not_found(what: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { what, id: id.into() }
    }

    /// Create a backend unavailable error from any displayable cause.
    pub fn backend(backend: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: format!("{reason:#}"),
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Suggested HTTP status code for the CRUD layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Expired { .. } => 410,
            Self::QuotaExceeded { .. } => 413,
            Self::BackendUnavailable { .. } => 503,
        }
    }
}
