//! Path validation for byte store keys.
//!
//! Logical paths are relative, slash-separated keys. Anything that could
//! escape a filesystem root is rejected before it reaches a backend.

use anyhow::{Result, bail};
use std::path::{Component, Path, PathBuf};

/// Validates a logical path and returns its normalized form.
///
/// Rejects paths that:
/// - Are empty
/// - Are absolute (start with `/` or drive letter)
/// - Contain `..` components
///
/// `.` components are dropped and separators are normalized to `/`.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        bail!("Object path cannot be empty");
    }

    let as_path = Path::new(path);
    if as_path.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        bail!("Object path cannot be absolute: {path}");
    }

    let mut parts = Vec::new();
    for component in as_path.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_string_lossy().replace('\\', "/")),
            Component::CurDir => {},
            Component::ParentDir => bail!("Object path cannot contain '..': {path}"),
            Component::RootDir | Component::Prefix(_) => {
                bail!("Object path cannot contain root or prefix: {path}")
            },
        }
    }

    if parts.is_empty() {
        bail!("Object path normalized to empty path");
    }

    Ok(parts.join("/"))
}

/// Returns the filesystem location for an object under `base_dir`.
pub(crate) fn object_path(base_dir: &Path, path: &str) -> Result<PathBuf> {
    let normalized = normalize_path(path)?;
    Ok(base_dir.join(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_paths() {
        assert_eq!(normalize_path("a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(normalize_path("./a//b.txt").unwrap(), "a/b.txt");
        assert_eq!(
            normalize_path("thumbnails/uploads/photo.jpg").unwrap(),
            "thumbnails/uploads/photo.jpg"
        );
    }

    #[test]
    fn test_rejects_traversal_and_absolute() {
        for path in ["", ".", "../etc/passwd", "a/../../b", "/etc/passwd"] {
            assert!(normalize_path(path).is_err(), "accepted: {path:?}");
        }
    }

    #[test]
    fn test_object_path_joins_base() {
        let base = Path::new("/srv/objects");
        assert_eq!(
            object_path(base, "t1/a.bin").unwrap(),
            PathBuf::from("/srv/objects/t1/a.bin")
        );
    }
}
