//! SQLite persistence for the mirrored snapshot.
//!
//! Layout:
//! - `stages(id, name UNIQUE, path, last_updated)`
//! - `testcases(id, stage_id → stages, …)`: one row per manifest entry
//! - `sync_records(id, synced_at, revision_id, revision_time, content_digest)`
//!
//! The database runs in WAL mode. The writer replaces everything inside one
//! `IMMEDIATE` transaction; readers open their own connections and keep
//! seeing the previous generation until that transaction commits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};

use casemirror_core::types::{Revision, StageSnapshot, SyncRecord};

use crate::error::{io_err, StoreError};
use crate::schema;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the store database. Cheap to clone; every operation opens its
/// own connection.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let store = Self {
            db_path: path.to_path_buf(),
        };
        let conn = store.writer()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        tracing::debug!("store ready at {}", path.display());
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn writer(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Connection for queries: never creates the file and refuses writes.
    pub(crate) fn reader(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "query_only", "ON")?;
        Ok(conn)
    }

    /// Replace every stage and test case with `snapshot` and append a sync
    /// record for `revision`, all in one transaction.
    ///
    /// Stages are inserted in the order given. On any error the transaction
    /// is rolled back and the previous content stays in place.
    pub fn replace_all(
        &self,
        snapshot: &[StageSnapshot],
        revision: &Revision,
        content_digest: Option<&str>,
    ) -> Result<SyncRecord, StoreError> {
        let mut conn = self.writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM testcases", [])?;
        tx.execute("DELETE FROM stages", [])?;

        {
            let mut insert_stage = tx.prepare(schema::INSERT_STAGE_SQL)?;
            let mut insert_case = tx.prepare(schema::INSERT_TESTCASE_SQL)?;

            for entry in snapshot {
                let stage = &entry.stage;
                insert_stage.execute(params![
                    stage.name.0,
                    stage.path.to_string_lossy(),
                    format_timestamp(&stage.last_updated),
                ])?;
                let stage_id = tx.last_insert_rowid();

                for case in &entry.test_cases {
                    let cmp = encode("cmp", &case.cmp)?;
                    let provide = encode("provide", &case.provide)?;
                    let metainfo = encode("metainfo", &case.metainfo)?;
                    insert_case.execute(params![
                        stage_id,
                        case.name,
                        case.name_visible,
                        case.active,
                        case.source.path,
                        case.source.visible,
                        case.input.path,
                        case.input.visible,
                        case.output.path,
                        case.output.visible,
                        case.exitcode,
                        case.compileexitcode,
                        case.compiletimelimit,
                        case.compilememorylimit,
                        case.runtimelimit,
                        case.runtimememorylimit,
                        cmp,
                        provide,
                        metainfo,
                    ])?;
                }
            }
        }

        let synced_at = Utc::now();
        tx.execute(
            schema::INSERT_SYNC_RECORD_SQL,
            params![
                format_timestamp(&synced_at),
                revision.id,
                format_timestamp(&revision.timestamp),
                content_digest,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(SyncRecord {
            id,
            revision_id: revision.id.clone(),
            revision_time: Some(revision.timestamp),
            synced_at,
            content_digest: content_digest.map(str::to_string),
        })
    }

    /// Most recent sync record, if any reload has completed.
    pub fn latest_sync_record(&self) -> Result<Option<SyncRecord>, StoreError> {
        let conn = self.reader()?;
        latest_sync_record_in(&conn)
    }

    /// Total number of sync records kept as history.
    pub fn sync_record_count(&self) -> Result<i64, StoreError> {
        let conn = self.reader()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM sync_records", [], |row| row.get(0))?)
    }
}

pub(crate) fn latest_sync_record_in(conn: &Connection) -> Result<Option<SyncRecord>, StoreError> {
    Ok(conn
        .query_row(schema::LATEST_SYNC_RECORD_SQL, [], row_to_sync_record)
        .optional()?)
}

fn row_to_sync_record(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    let synced_at: String = row.get("synced_at")?;
    let revision_time: Option<String> = row.get("revision_time")?;
    Ok(SyncRecord {
        id: row.get("id")?,
        revision_id: row.get("revision_id")?,
        revision_time: parse_timestamp(revision_time),
        synced_at: parse_timestamp(Some(synced_at)).unwrap_or_default(),
        content_digest: row.get("content_digest")?,
    })
}

fn encode<T: serde::Serialize>(field: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { field, source })
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a stored timestamp into a `DateTime<Utc>`.
pub(crate) fn parse_timestamp(timestamp: Option<String>) -> Option<DateTime<Utc>> {
    timestamp.and_then(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use casemirror_core::types::{FileRef, Stage, StageName, TestCase};
    use tempfile::TempDir;

    fn stage(name: &str, cases: &[&str]) -> StageSnapshot {
        StageSnapshot {
            stage: Stage {
                name: StageName::from(name),
                path: PathBuf::from("/repo").join(name),
                last_updated: Utc::now(),
            },
            test_cases: cases
                .iter()
                .map(|n| TestCase {
                    name: n.to_string(),
                    source: FileRef::new(format!("{n}.rx"), true),
                    cmp: vec!["diff".into()],
                    ..TestCase::default()
                })
                .collect(),
        }
    }

    fn open_temp() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("db").join("testcases.db")).unwrap();
        (tmp, store)
    }

    fn count(store: &Store, table: &str) -> i64 {
        let conn = store.reader().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn open_creates_parent_directory_and_schema() {
        let (_tmp, store) = open_temp();
        assert!(store.db_path().exists());
        assert_eq!(count(&store, "stages"), 0);
        assert!(store.latest_sync_record().unwrap().is_none());
    }

    #[test]
    fn open_is_idempotent() {
        let (_tmp, store) = open_temp();
        store
            .replace_all(&[stage("s1", &["a"])], &Revision::unknown(), None)
            .unwrap();
        let reopened = Store::open(store.db_path()).unwrap();
        assert_eq!(count(&reopened, "testcases"), 1);
    }

    #[test]
    fn replace_all_swaps_content_and_appends_record() {
        let (_tmp, store) = open_temp();
        store
            .replace_all(&[stage("s1", &["a", "b"])], &Revision::unknown(), None)
            .unwrap();
        let record = store
            .replace_all(&[stage("s2", &["c"])], &Revision::unknown(), Some("abc"))
            .unwrap();

        assert_eq!(count(&store, "stages"), 1);
        assert_eq!(count(&store, "testcases"), 1);
        assert_eq!(store.sync_record_count().unwrap(), 2);

        let latest = store.latest_sync_record().unwrap().expect("record");
        assert_eq!(latest.id, record.id);
        assert_eq!(latest.content_digest.as_deref(), Some("abc"));
    }

    #[test]
    fn stage_ids_restart_after_replace() {
        let (_tmp, store) = open_temp();
        for _ in 0..2 {
            store
                .replace_all(&[stage("s1", &[]), stage("s2", &[])], &Revision::unknown(), None)
                .unwrap();
        }
        let conn = store.reader().unwrap();
        let max_id: i64 = conn
            .query_row("SELECT MAX(id) FROM stages", [], |r| r.get(0))
            .unwrap();
        assert_eq!(max_id, 2);
    }

    #[test]
    fn failed_replace_keeps_previous_snapshot() {
        let (_tmp, store) = open_temp();
        let revision = Revision {
            id: "deadbeef".into(),
            timestamp: Utc::now(),
        };
        store
            .replace_all(&[stage("s1", &["a", "b"])], &revision, None)
            .unwrap();

        // Duplicate stage names violate the UNIQUE constraint mid-transaction.
        let err = store
            .replace_all(
                &[stage("dup", &["x"]), stage("dup", &["y"])],
                &Revision::unknown(),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)), "got: {err}");

        assert_eq!(count(&store, "stages"), 1);
        assert_eq!(count(&store, "testcases"), 2);
        let latest = store.latest_sync_record().unwrap().expect("record");
        assert_eq!(latest.revision_id, "deadbeef");
        assert_eq!(store.sync_record_count().unwrap(), 1);
    }

    #[test]
    fn reader_refuses_writes() {
        let (_tmp, store) = open_temp();
        let conn = store.reader().unwrap();
        assert!(conn.execute("DELETE FROM stages", []).is_err());
    }

    #[test]
    fn timestamps_roundtrip_through_text() {
        let now = Utc::now();
        assert_eq!(parse_timestamp(Some(format_timestamp(&now))), Some(now));
        assert_eq!(parse_timestamp(Some("yesterday".into())), None);
    }
}
