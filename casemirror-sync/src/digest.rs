//! SHA-256 fingerprint of a snapshot.
//!
//! Two reloads of an unchanged tree produce the same digest; the reloader
//! compares it with the previous sync record to report whether content
//! changed.

use sha2::{Digest, Sha256};

use casemirror_core::types::StageSnapshot;

use crate::error::SyncError;

/// Hex SHA-256 over the canonical JSON of `snapshot`.
pub fn snapshot_digest(snapshot: &[StageSnapshot]) -> Result<String, SyncError> {
    let bytes = serde_json::to_vec(snapshot)?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use casemirror_core::types::{Stage, StageName, TestCase};
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn snapshot(case_name: &str) -> Vec<StageSnapshot> {
        vec![StageSnapshot {
            stage: Stage {
                name: StageName::from("s1"),
                path: PathBuf::from("/repo/s1"),
                last_updated: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            },
            test_cases: vec![TestCase {
                name: case_name.to_string(),
                ..TestCase::default()
            }],
        }]
    }

    #[test]
    fn equal_snapshots_share_a_digest() {
        assert_eq!(
            snapshot_digest(&snapshot("a")).unwrap(),
            snapshot_digest(&snapshot("a")).unwrap()
        );
    }

    #[test]
    fn changed_case_changes_digest() {
        let a = snapshot_digest(&snapshot("a")).unwrap();
        let b = snapshot_digest(&snapshot("b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }
}
