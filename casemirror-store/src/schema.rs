//! Table definitions.
//!
//! `stages` and `testcases` use plain `INTEGER PRIMARY KEY` so that a full
//! replace renumbers rows from 1 in insertion order. `sync_records` keeps
//! `AUTOINCREMENT` because it is append-only history.

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS stages (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    path TEXT NOT NULL,
    last_updated TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS testcases (
    id INTEGER PRIMARY KEY,
    stage_id INTEGER NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    name_visible INTEGER NOT NULL,
    active INTEGER NOT NULL,
    source_path TEXT NOT NULL,
    source_visible INTEGER NOT NULL,
    input_path TEXT NOT NULL,
    input_visible INTEGER NOT NULL,
    output_path TEXT NOT NULL,
    output_visible INTEGER NOT NULL,
    exitcode INTEGER NOT NULL,
    compileexitcode INTEGER NOT NULL,
    compiletimelimit INTEGER NOT NULL,
    compilememorylimit INTEGER NOT NULL,
    runtimelimit INTEGER NOT NULL,
    runtimememorylimit INTEGER NOT NULL,
    cmp TEXT NOT NULL DEFAULT '[]',
    provide TEXT NOT NULL DEFAULT '[]',
    metainfo TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_testcases_stage_name ON testcases(stage_id, name);
CREATE TABLE IF NOT EXISTS sync_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    synced_at TEXT NOT NULL,
    revision_id TEXT NOT NULL,
    revision_time TEXT,
    content_digest TEXT
);
"#;

pub(crate) const INSERT_STAGE_SQL: &str =
    "INSERT INTO stages (name, path, last_updated) VALUES (?1, ?2, ?3)";

pub(crate) const INSERT_TESTCASE_SQL: &str = r#"
INSERT INTO testcases (
    stage_id, name, name_visible, active, source_path, source_visible,
    input_path, input_visible, output_path, output_visible,
    exitcode, compileexitcode, compiletimelimit, compilememorylimit,
    runtimelimit, runtimememorylimit, cmp, provide, metainfo
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
"#;

pub(crate) const INSERT_SYNC_RECORD_SQL: &str = "INSERT INTO sync_records \
     (synced_at, revision_id, revision_time, content_digest) VALUES (?1, ?2, ?3, ?4)";

pub(crate) const LATEST_SYNC_RECORD_SQL: &str = "SELECT id, synced_at, revision_id, \
     revision_time, content_digest FROM sync_records ORDER BY id DESC LIMIT 1";
