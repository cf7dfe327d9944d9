//! Error types for casemirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use casemirror_store::StoreError;

/// Errors that abort a reload. The stored snapshot is untouched when one of
/// these is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the store (open, replace, or record lookup).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be serialized for hashing.
    #[error("snapshot digest error: {0}")]
    Digest(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
