//! Settings error-message, atomic-write-safety, and override integration tests.

use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use casemirror_core::{
    settings::{self, SettingsFile},
    ConfigError,
};
use predicates::prelude::predicate;

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".casemirror/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = settings::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"), "must contain file path, got: {err}");
}

#[test]
fn load_unknown_key_is_rejected() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".casemirror/config.yaml")
        .write_str("repo_pth: /srv/typo\n")
        .expect("write");

    let err = settings::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn empty_file_means_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".casemirror/config.yaml").write_str("\n").expect("write");

    let loaded = settings::load_at(home.path()).expect("load");
    assert_eq!(loaded.remote, "origin");
}

#[test]
fn save_cleans_up_tmp_file_and_writes_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = SettingsFile {
        repo_path: Some(PathBuf::from("/srv/RCompiler-Testcases")),
        sync_interval_secs: Some(120),
        ..SettingsFile::default()
    };
    settings::save_file_at(home.path(), &file).expect("save");

    home.child(".casemirror/config.yaml.tmp")
        .assert(predicate::path::missing());
    home.child(".casemirror/config.yaml")
        .assert(predicate::str::contains("sync_interval_secs: 120"));

    let raw = fs::read_to_string(settings::config_path_at(home.path())).expect("read");
    assert!(!raw.contains("db_path"), "unset keys must not be written");
}

#[test]
fn saved_file_reloads_identically() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let file = SettingsFile {
        db_path: Some(PathBuf::from("/var/lib/casemirror/cases.db")),
        remote: Some("upstream".into()),
        git_timeout_secs: Some(5),
        ..SettingsFile::default()
    };
    settings::save_file_at(home.path(), &file).expect("save");
    assert_eq!(settings::load_file_at(home.path()).expect("load"), file);
}
