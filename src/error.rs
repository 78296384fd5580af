use std::path::{Path, PathBuf};

use thiserror::Error;

/// The error type for all `raglite` operations.
///
/// Mirrors the kind list in the system's error handling design: filesystem
/// and database failures abort the current operation, embedding/rerank
/// failures are recovered by callers (ingestion/search loops downgrade them
/// to counters or warnings instead of propagating), and `ModelIncompatible`
/// carries both sides so callers can decide whether to rebuild.
#[derive(Debug, Error)]
pub enum RagliteError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("disk full while writing {0}")]
    DiskFull(PathBuf),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database file is not a valid database: {0}")]
    DatabaseCorrupt(String),

    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("index truncated: {0}")]
    IndexTruncated(String),

    #[error("index dimension mismatch: expected {expected}, got {actual}")]
    IndexDimensionMismatch { expected: u16, actual: u16 },

    #[error("model '{0}' is not in the registry; supported models: {1}")]
    ModelUnsupported(String, String),

    #[error(
        "model incompatible: dataset was created with '{stored_model}' ({stored_dims}-d), \
         requested '{requested_model}' ({requested_dims}-d); call rebuild() to switch models"
    )]
    ModelIncompatible {
        stored_model: String,
        stored_dims: u16,
        requested_model: String,
        requested_dims: u16,
    },

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("embedding error: {0}")]
    EmbeddingError(String),

    #[error("rerank failed: {0}")]
    RerankFailed(String),

    #[error("operation timed out waiting for a writer connection to {0}")]
    Busy(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for RagliteError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        RagliteError::LockPoisoned(format!("failed to acquire lock: {err}"))
    }
}

/// Classifies a filesystem `io::Error` against `path` into the specific
/// kinds spec.md §7 names (`PathNotFound`, `PermissionDenied`, `DiskFull`)
/// rather than letting every filesystem failure fall through the blanket
/// `Io` conversion. ENOSPC has no stable `ErrorKind` yet, so `DiskFull` is
/// detected via the raw OS error code on unix (28) and Windows (112).
pub fn classify_io_error(err: std::io::Error, path: &Path) -> RagliteError {
    match err.kind() {
        std::io::ErrorKind::NotFound => RagliteError::PathNotFound(path.to_path_buf()),
        std::io::ErrorKind::PermissionDenied => RagliteError::PermissionDenied(path.to_path_buf()),
        _ => match err.raw_os_error() {
            Some(28) | Some(112) => RagliteError::DiskFull(path.to_path_buf()),
            _ => RagliteError::Io(err),
        },
    }
}

pub type Result<T> = std::result::Result<T, RagliteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_io_error_maps_not_found() {
        let path = PathBuf::from("/nonexistent/does-not-exist");
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(classify_io_error(err, &path), RagliteError::PathNotFound(p) if p == path));
    }

    #[test]
    fn classify_io_error_maps_permission_denied() {
        let path = PathBuf::from("/root/locked");
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(classify_io_error(err, &path), RagliteError::PermissionDenied(p) if p == path));
    }

    #[test]
    fn classify_io_error_falls_back_to_generic_io() {
        let path = PathBuf::from("/tmp/whatever");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "transient failure");
        assert!(matches!(classify_io_error(err, &path), RagliteError::Io(_)));
    }
}
