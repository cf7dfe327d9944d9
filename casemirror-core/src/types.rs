//! Domain types mirrored from the external test-case tree.
//!
//! A [`Stage`] is one top-level directory of the tree; its manifest lists
//! [`TestCase`]s. A [`SyncRecord`] remembers which [`Revision`] the stored
//! snapshot was built from.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Revision id reported when the external tree's head cannot be resolved.
pub const UNKNOWN_REVISION: &str = "unknown";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Directory name of a stage; identity across syncs is by name only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StageName(pub String);

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Directory names never treated as stages, besides hidden ones.
const EXCLUDED_DIRS: &[&str] = &["node_modules"];

/// Whether a top-level directory name can never be a stage.
pub fn is_excluded_stage(name: &str) -> bool {
    name.starts_with('.') || EXCLUDED_DIRS.contains(&name)
}

// ---------------------------------------------------------------------------
// Test cases
// ---------------------------------------------------------------------------

/// A file referenced by a test case, relative to its stage directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    /// Only meaningful when `path` is non-empty.
    pub visible: bool,
}

impl FileRef {
    pub fn new(path: impl Into<String>, visible: bool) -> Self {
        let path = path.into();
        let visible = visible && !path.is_empty();
        Self { path, visible }
    }
}

/// One entry of a stage manifest.
///
/// Limits are unit-agnostic; `0` means unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    pub name_visible: bool,
    pub active: bool,
    pub source: FileRef,
    pub input: FileRef,
    pub output: FileRef,
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

// ---------------------------------------------------------------------------
// Stages and snapshots
// ---------------------------------------------------------------------------

/// A top-level directory of the external tree, as materialized by a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: StageName,
    pub path: PathBuf,
    pub last_updated: DateTime<Utc>,
}

/// A stage together with every test case parsed from its manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub test_cases: Vec<TestCase>,
}

// ---------------------------------------------------------------------------
// Revisions
// ---------------------------------------------------------------------------

/// Head of the external tree at sync time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

impl Revision {
    /// Sentinel used when revision metadata is unavailable.
    pub fn unknown() -> Self {
        Self {
            id: UNKNOWN_REVISION.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.id == UNKNOWN_REVISION
    }
}

/// One row per successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: i64,
    pub revision_id: String,
    pub revision_time: Option<DateTime<Utc>>,
    pub synced_at: DateTime<Utc>,
    /// SHA-256 of the stored snapshot; absent for records written without one.
    pub content_digest: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
