//! casemirror core library: domain types, manifest parsing, settings, errors.
//!
//! Public API surface:
//! - [`types`]: stages, test cases, revisions and sync records
//! - [`manifest`]: per-stage `global.json` parsing with field defaulting
//! - [`settings`]: `~/.casemirror/config.yaml` load / save / init
//! - [`error`]: [`ConfigError`], [`ManifestError`]

pub mod error;
pub mod manifest;
pub mod settings;
pub mod types;

pub use error::{ConfigError, ManifestError};
pub use settings::Settings;
pub use types::{
    is_excluded_stage, FileRef, Revision, Stage, StageName, StageSnapshot, SyncRecord, TestCase,
    UNKNOWN_REVISION,
};
