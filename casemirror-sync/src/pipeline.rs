//! The reload pipeline shared by the CLI and the daemon processor.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use casemirror_store::Store;

use crate::digest::snapshot_digest;
use crate::fetcher::{resolve_revision, Fetcher};
use crate::stages::build_snapshot;
use crate::SyncError;

/// Outcome of one successful reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub revision_id: String,
    pub revision_time: DateTime<Utc>,
    pub stages: usize,
    pub test_cases: usize,
    /// False when the new snapshot hashes the same as the previous one.
    pub changed: bool,
    pub sync_record_id: i64,
    pub duration_ms: u64,
}

/// Rebuilds the store from the external tree.
///
/// Calls to [`Reloader::reload`] are serialized: a second caller waits for
/// the running reload to finish and then performs its own.
pub struct Reloader {
    root: PathBuf,
    fetcher: Box<dyn Fetcher>,
    store: Store,
    lock: Mutex<()>,
}

impl Reloader {
    pub fn new(root: impl Into<PathBuf>, fetcher: Box<dyn Fetcher>, store: Store) -> Self {
        Self {
            root: root.into(),
            fetcher,
            store,
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetch, rebuild the snapshot and replace the store in one transaction.
    ///
    /// Fetch failures are logged and the reload continues against whatever
    /// is on disk. Any error returned here leaves the stored content as it
    /// was.
    pub fn reload(&self) -> Result<ReloadSummary, SyncError> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let started = Instant::now();

        if let Err(err) = self.fetcher.advance() {
            tracing::warn!("fetch failed, reloading local tree: {err}");
        }
        let revision = resolve_revision(self.fetcher.as_ref());

        let snapshot = build_snapshot(&self.root, &revision)?;
        let digest = snapshot_digest(&snapshot)?;

        let previous = self.store.latest_sync_record()?;
        let changed = previous
            .and_then(|record| record.content_digest)
            .map_or(true, |prev| prev != digest);

        let record = self.store.replace_all(&snapshot, &revision, Some(&digest))?;

        let summary = ReloadSummary {
            revision_id: revision.id,
            revision_time: revision.timestamp,
            stages: snapshot.len(),
            test_cases: snapshot.iter().map(|s| s.test_cases.len()).sum(),
            changed,
            sync_record_id: record.id,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            "reloaded {} stages / {} test cases at {} ({}, {} ms)",
            summary.stages,
            summary.test_cases,
            summary.revision_id,
            if summary.changed { "changed" } else { "unchanged" },
            summary.duration_ms
        );
        Ok(summary)
    }
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("root", &self.root)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use casemirror_core::types::Revision;
    use tempfile::TempDir;

    use super::*;
    use crate::FetchError;

    struct Offline;

    impl Fetcher for Offline {
        fn advance(&self) -> Result<(), FetchError> {
            Err(FetchError::Parse("offline".into()))
        }
        fn current_revision(&self) -> Result<Revision, FetchError> {
            Err(FetchError::Parse("offline".into()))
        }
    }

    #[test]
    fn first_reload_is_changed_second_is_not() {
        let tmp = TempDir::new().expect("tmp");
        let root = tmp.path().join("repo");
        fs::create_dir_all(root.join("s1")).expect("mkdir");
        fs::write(root.join("s1").join("global.json"), r#"[{"name":"a"}]"#).expect("write");
        let store = Store::open(&tmp.path().join("t.db")).expect("store");
        let reloader = Reloader::new(&root, Box::new(Offline), store);

        let first = reloader.reload().expect("first");
        assert!(first.changed);
        assert_eq!((first.stages, first.test_cases), (1, 1));
        assert_eq!(first.revision_id, "unknown");

        let second = reloader.reload().expect("second");
        assert!(!second.changed);
        assert!(second.sync_record_id > first.sync_record_id);
    }

    #[test]
    fn summary_serializes_flat() {
        let summary = ReloadSummary {
            revision_id: "abc".into(),
            revision_time: Utc::now(),
            stages: 2,
            test_cases: 5,
            changed: true,
            sync_record_id: 1,
            duration_ms: 12,
        };
        let json = serde_json::to_value(&summary).expect("json");
        assert_eq!(json["revision_id"], "abc");
        assert_eq!(json["test_cases"], 5);
    }
}
