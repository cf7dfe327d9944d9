//! Stage discovery in the external tree.
//!
//! Every immediate subdirectory of the root is a stage, except hidden
//! directories and `node_modules`. Stages are returned sorted by name so the
//! snapshot, its digest, and the assigned ids are stable across reloads.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use casemirror_core::manifest::{read_manifest, MANIFEST_FILE};
use casemirror_core::types::{is_excluded_stage, Revision, Stage, StageName, StageSnapshot};

use crate::error::{io_err, SyncError};

/// Stage directories directly under `root`, sorted by name.
///
/// Symlinks to directories count as stages. Entries whose names are not valid
/// UTF-8 are skipped.
pub fn enumerate_stages(root: &Path) -> Result<Vec<(StageName, PathBuf)>, SyncError> {
    let entries = fs::read_dir(root).map_err(|e| io_err(root, e))?;

    let mut stages = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(root, e))?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!("skipping non UTF-8 entry {}", path.display());
            continue;
        };
        if is_excluded_stage(&name) || !path.is_dir() {
            continue;
        }
        stages.push((StageName(name), path));
    }
    stages.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(stages)
}

/// Modification time of the stage's manifest, else of the directory, else
/// the revision timestamp.
pub fn stage_last_updated(dir: &Path, revision: &Revision) -> DateTime<Utc> {
    [dir.join(MANIFEST_FILE), dir.to_path_buf()]
        .iter()
        .find_map(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
        .map(DateTime::<Utc>::from)
        .unwrap_or(revision.timestamp)
}

/// Build the full snapshot of the tree at `root`.
///
/// A stage without a manifest, or with one that cannot be parsed, yields zero
/// test cases; the stage itself is still recorded.
pub fn build_snapshot(root: &Path, revision: &Revision) -> Result<Vec<StageSnapshot>, SyncError> {
    let stages = enumerate_stages(root)?;
    let mut snapshot = Vec::with_capacity(stages.len());

    for (name, dir) in stages {
        let manifest = dir.join(MANIFEST_FILE);
        let test_cases = if manifest.is_file() {
            read_manifest(&manifest)
        } else {
            tracing::debug!("stage '{name}' has no {MANIFEST_FILE}");
            Vec::new()
        };
        snapshot.push(StageSnapshot {
            stage: Stage {
                last_updated: stage_last_updated(&dir, revision),
                name,
                path: dir,
            },
            test_cases,
        });
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn names(root: &Path) -> Vec<String> {
        enumerate_stages(root)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name.0)
            .collect()
    }

    #[test]
    fn enumerates_directories_sorted_and_skips_files() {
        let tmp = TempDir::new().unwrap();
        for dir in ["zeta", "alpha", ".git", "node_modules", "mid"] {
            fs::create_dir(tmp.path().join(dir)).unwrap();
        }
        fs::write(tmp.path().join("README.md"), "readme").unwrap();
        assert_eq!(names(tmp.path()), ["alpha", "mid", "zeta"]);
    }

    #[test]
    #[cfg(unix)]
    fn symlinked_directory_is_a_stage() {
        let tmp = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        std::os::unix::fs::symlink(target.path(), tmp.path().join("linked")).unwrap();
        assert_eq!(names(tmp.path()), ["linked"]);
    }

    #[test]
    fn missing_root_is_an_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = enumerate_stages(&tmp.path().join("absent")).unwrap_err();
        assert!(matches!(err, SyncError::Io { .. }), "got {err}");
    }

    #[test]
    fn last_updated_prefers_manifest_mtime() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join(MANIFEST_FILE);
        fs::write(&manifest, "[]").unwrap();
        let stamp = filetime::FileTime::from_unix_time(1_700_000_000, 0);
        filetime::set_file_mtime(&manifest, stamp).unwrap();

        let updated = stage_last_updated(tmp.path(), &Revision::unknown());
        assert_eq!(updated.timestamp(), 1_700_000_000);
    }

    #[test]
    fn last_updated_falls_back_to_revision_time() {
        let tmp = TempDir::new().unwrap();
        let revision = Revision::unknown();
        let updated = stage_last_updated(&tmp.path().join("gone"), &revision);
        assert_eq!(updated, revision.timestamp);
    }

    #[test]
    fn stage_without_manifest_has_no_cases() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();
        let snapshot = build_snapshot(tmp.path(), &Revision::unknown()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].stage.name.0, "empty");
        assert!(snapshot[0].test_cases.is_empty());
    }
}
