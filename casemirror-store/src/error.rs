//! Error types for casemirror-store.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the SQLite store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode test case field '{field}': {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Request-level failures of the query layer.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(&'static str),

    /// Unknown, unreadable, or outside the external root.
    #[error("file not found or not readable: {stage}/{path}")]
    NotFound { stage: String, path: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl QueryError {
    /// HTTP-style status for the failure category.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::MissingParameter(_) => 400,
            QueryError::NotFound { .. } => 404,
            QueryError::Store(_) => 500,
        }
    }

    /// Message safe to hand to a client; carries no filesystem detail.
    pub fn public_message(&self) -> String {
        match self {
            QueryError::MissingParameter(_) => "Stage name and file path are required".to_string(),
            QueryError::NotFound { .. } => "File not found or not readable".to_string(),
            QueryError::Store(err) => err.to_string(),
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
