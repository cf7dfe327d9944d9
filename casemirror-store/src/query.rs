//! Read-only queries served to clients.
//!
//! `list_stages` and `list_test_cases` each run inside a single read
//! transaction, so the rows and the sync record they return belong to the
//! same committed generation. `read_file` reads straight from the external
//! tree and never leaves its root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use casemirror_core::types::{is_excluded_stage, SyncRecord, UNKNOWN_REVISION};

use crate::error::{QueryError, StoreError};
use crate::store::{latest_sync_record_in, parse_timestamp, Store};

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Revision information attached to every list response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub hash: String,
    /// Revision timestamp.
    pub date: Option<DateTime<Utc>>,
    /// When the sync that produced the snapshot ran.
    pub last_updated: Option<DateTime<Utc>>,
}

impl GitInfo {
    /// Placeholder returned before the first sync.
    pub fn placeholder() -> Self {
        Self {
            hash: UNKNOWN_REVISION.to_string(),
            date: None,
            last_updated: None,
        }
    }
}

impl From<Option<SyncRecord>> for GitInfo {
    fn from(record: Option<SyncRecord>) -> Self {
        match record {
            Some(record) => Self {
                hash: record.revision_id,
                date: record.revision_time,
                last_updated: Some(record.synced_at),
            },
            None => Self::placeholder(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSummary {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub last_updated: Option<DateTime<Utc>>,
    pub testcase_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagesView {
    pub stages: Vec<StageSummary>,
    #[serde(rename = "gitInfo")]
    pub git_info: GitInfo,
}

/// A stored test case with its structured fields decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRow {
    pub id: i64,
    pub stage_id: i64,
    pub stage_name: String,
    pub name: String,
    pub name_visible: bool,
    pub active: bool,
    pub source_path: String,
    pub source_visible: bool,
    pub input_path: String,
    pub input_visible: bool,
    pub output_path: String,
    pub output_visible: bool,
    pub exitcode: i64,
    pub compileexitcode: i64,
    pub compiletimelimit: i64,
    pub compilememorylimit: i64,
    pub runtimelimit: i64,
    pub runtimememorylimit: i64,
    pub cmp: Vec<String>,
    pub provide: Vec<String>,
    pub metainfo: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCasesView {
    pub testcases: Vec<TestCaseRow>,
    #[serde(rename = "gitInfo")]
    pub git_info: GitInfo,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

const STAGES_SQL: &str = "SELECT s.id, s.name, s.path, s.last_updated, \
     COUNT(t.id) AS testcase_count \
     FROM stages s LEFT JOIN testcases t ON s.id = t.stage_id \
     GROUP BY s.id ORDER BY s.name";

const STAGE_EXISTS_SQL: &str = "SELECT 1 FROM stages WHERE name = ?1";

const TESTCASES_SQL: &str = "SELECT t.*, s.name AS stage_name \
     FROM testcases t JOIN stages s ON t.stage_id = s.id \
     WHERE s.name = ?1 ORDER BY t.name, t.id";

/// Query handle over a [`Store`] and the external tree it mirrors.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Store,
    repo_root: PathBuf,
}

impl QueryService {
    pub fn new(store: Store, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Every stage with its test-case count, ordered by name.
    pub fn list_stages(&self) -> Result<StagesView, QueryError> {
        let mut conn = self.store.reader()?;
        let tx = conn.transaction().map_err(StoreError::from)?;

        let stages = query_stages(&tx)?;
        let git_info = GitInfo::from(latest_sync_record_in(&tx)?);
        tx.finish().map_err(StoreError::from)?;

        Ok(StagesView { stages, git_info })
    }

    /// Test cases of `stage` ordered by name; empty for an unknown stage.
    pub fn list_test_cases(&self, stage: &str) -> Result<TestCasesView, QueryError> {
        let mut conn = self.store.reader()?;
        let tx = conn.transaction().map_err(StoreError::from)?;

        let testcases = query_test_cases(&tx, stage)?;
        let git_info = GitInfo::from(latest_sync_record_in(&tx)?);
        tx.finish().map_err(StoreError::from)?;

        Ok(TestCasesView {
            testcases,
            git_info,
        })
    }

    /// Text of `<repo_root>/<stage>/<relative_path>`.
    ///
    /// `stage` must be a stored stage. The resolved path is canonicalized and
    /// must land inside a stored stage directory, with no hidden or
    /// `node_modules` component on the way; anything else is reported as not
    /// found.
    pub fn read_file(&self, stage: &str, relative_path: &str) -> Result<String, QueryError> {
        if stage.is_empty() {
            return Err(QueryError::MissingParameter("stageName"));
        }
        if relative_path.is_empty() {
            return Err(QueryError::MissingParameter("filePath"));
        }
        let not_found = || QueryError::NotFound {
            stage: stage.to_string(),
            path: relative_path.to_string(),
        };

        if is_excluded_stage(stage) {
            return Err(not_found());
        }
        let conn = self.store.reader()?;
        if !stage_exists(&conn, stage)? {
            tracing::debug!("file request for unknown stage {stage}");
            return Err(not_found());
        }

        let root = self.repo_root.canonicalize().map_err(|err| {
            tracing::warn!("repo root {} unavailable: {err}", self.repo_root.display());
            not_found()
        })?;
        let resolved = root
            .join(stage)
            .join(relative_path)
            .canonicalize()
            .map_err(|_| not_found())?;

        let Ok(inside) = resolved.strip_prefix(&root) else {
            tracing::warn!(
                "rejected file request escaping repo root: {stage}/{relative_path} -> {}",
                resolved.display()
            );
            return Err(not_found());
        };
        let mut names = inside.components().map(|c| c.as_os_str().to_str());
        let landing = match names.next() {
            Some(Some(name)) => name,
            _ => return Err(not_found()),
        };
        if !names.all(|name| name.is_some_and(|n| !is_excluded_stage(n)))
            || is_excluded_stage(landing)
            || !stage_exists(&conn, landing)?
        {
            tracing::warn!(
                "rejected file request outside stage directories: {stage}/{relative_path}"
            );
            return Err(not_found());
        }
        if !resolved.is_file() {
            return Err(not_found());
        }

        std::fs::read_to_string(&resolved).map_err(|err| {
            tracing::debug!("cannot read {}: {err}", resolved.display());
            not_found()
        })
    }
}

fn stage_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(STAGE_EXISTS_SQL, [name], |_| Ok(()))
        .optional()?
        .is_some())
}

fn query_stages(conn: &Connection) -> Result<Vec<StageSummary>, StoreError> {
    let mut stmt = conn.prepare(STAGES_SQL)?;
    let rows = stmt.query_map([], |row| {
        let last_updated: Option<String> = row.get("last_updated")?;
        Ok(StageSummary {
            id: row.get("id")?,
            name: row.get("name")?,
            path: row.get("path")?,
            last_updated: parse_timestamp(last_updated),
            testcase_count: row.get("testcase_count")?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn query_test_cases(conn: &Connection, stage: &str) -> Result<Vec<TestCaseRow>, StoreError> {
    let mut stmt = conn.prepare(TESTCASES_SQL)?;
    let rows = stmt.query_map([stage], row_to_test_case)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn row_to_test_case(row: &Row<'_>) -> rusqlite::Result<TestCaseRow> {
    let cmp: Option<String> = row.get("cmp")?;
    let provide: Option<String> = row.get("provide")?;
    let metainfo: Option<String> = row.get("metainfo")?;
    Ok(TestCaseRow {
        id: row.get("id")?,
        stage_id: row.get("stage_id")?,
        stage_name: row.get("stage_name")?,
        name: row.get("name")?,
        name_visible: row.get("name_visible")?,
        active: row.get("active")?,
        source_path: row.get("source_path")?,
        source_visible: row.get("source_visible")?,
        input_path: row.get("input_path")?,
        input_visible: row.get("input_visible")?,
        output_path: row.get("output_path")?,
        output_visible: row.get("output_visible")?,
        exitcode: row.get("exitcode")?,
        compileexitcode: row.get("compileexitcode")?,
        compiletimelimit: row.get("compiletimelimit")?,
        compilememorylimit: row.get("compilememorylimit")?,
        runtimelimit: row.get("runtimelimit")?,
        runtimememorylimit: row.get("runtimememorylimit")?,
        cmp: decode_or_default(cmp),
        provide: decode_or_default(provide),
        metainfo: decode_or_default(metainfo),
    })
}

/// Stored JSON that does not decode falls back to the empty value.
fn decode_or_default<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_info_placeholder_before_first_sync() {
        let info = GitInfo::from(None);
        assert_eq!(info.hash, "unknown");
        assert!(info.date.is_none());
        assert!(info.last_updated.is_none());
    }

    #[test]
    fn corrupt_stored_json_decodes_to_default() {
        let cmp: Vec<String> = decode_or_default(Some("not json".into()));
        assert!(cmp.is_empty());
        let meta: Map<String, Value> = decode_or_default(None);
        assert!(meta.is_empty());
    }

    #[test]
    fn views_serialize_git_info_in_camel_case() {
        let view = StagesView {
            stages: vec![],
            git_info: GitInfo::placeholder(),
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["gitInfo"]["hash"], "unknown");
        assert!(json["gitInfo"]["date"].is_null());
    }

    #[test]
    fn missing_parameters_are_client_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = Store::open(&tmp.path().join("t.db")).unwrap();
        let service = QueryService::new(store, tmp.path());
        let err = service.read_file("", "a.txt").unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = service.read_file("stage", "").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
