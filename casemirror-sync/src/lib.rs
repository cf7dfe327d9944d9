//! # casemirror-sync
//!
//! Fetch → enumerate stages → parse manifests → replace the store.
//!
//! [`Reloader::reload`] is the single sync entrypoint used by the CLI and the
//! daemon. Fetch failures degrade to an `"unknown"` revision; store failures
//! abort the reload and leave the previous snapshot in place.

pub mod digest;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod stages;

pub use error::SyncError;
pub use fetcher::{resolve_revision, FetchError, Fetcher, GitFetcher};
pub use pipeline::{ReloadSummary, Reloader};
