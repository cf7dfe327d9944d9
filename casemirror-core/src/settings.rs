//! Runtime settings stored in `~/.casemirror/config.yaml`.
//!
//! # Storage layout
//!
//! ```text
//! ~/.casemirror/
//!   config.yaml     (settings, mode 0600, optional)
//!   testcases.db    (default store location)
//!   repo/           (default external tree checkout)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_REMOTE: &str = "origin";
/// Ten minutes between scheduled reloads.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.casemirror/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".casemirror")
}

/// `<home>/.casemirror/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

/// `<home>/.casemirror/testcases.db`
pub fn default_db_path_at(home: &Path) -> PathBuf {
    root_at(home).join("testcases.db")
}

/// `<home>/.casemirror/repo`
pub fn default_repo_path_at(home: &Path) -> PathBuf {
    root_at(home).join("repo")
}

// ---------------------------------------------------------------------------
// 2. Types
// ---------------------------------------------------------------------------

/// On-disk form of the settings; every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_timeout_secs: Option<u64>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of the external test-case tree.
    pub repo_path: PathBuf,
    pub db_path: PathBuf,
    /// Git remote fetched on every reload.
    pub remote: String,
    pub sync_interval: Duration,
    /// Upper bound for each git invocation.
    pub git_timeout: Duration,
}

impl Settings {
    /// Fill unset keys of `file` with defaults rooted at `home`.
    pub fn resolve(home: &Path, file: SettingsFile) -> Self {
        Self {
            repo_path: file
                .repo_path
                .unwrap_or_else(|| default_repo_path_at(home)),
            db_path: file.db_path.unwrap_or_else(|| default_db_path_at(home)),
            remote: file.remote.unwrap_or_else(|| DEFAULT_REMOTE.to_string()),
            sync_interval: Duration::from_secs(
                file.sync_interval_secs
                    .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS)
                    .max(1),
            ),
            git_timeout: Duration::from_secs(
                file.git_timeout_secs.unwrap_or(DEFAULT_GIT_TIMEOUT_SECS).max(1),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.casemirror/config.yaml`; an absent file yields an empty [`SettingsFile`].
///
/// Returns `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_file_at(home: &Path) -> Result<SettingsFile, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    if contents.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })
}

/// Load and resolve settings rooted at `home`.
pub fn load_at(home: &Path) -> Result<Settings, ConfigError> {
    Ok(Settings::resolve(home, load_file_at(home)?))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, ConfigError> {
    load_at(&home()?)
}

// ---------------------------------------------------------------------------
// 4. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `file` to `<home>/.casemirror/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_file_at(home: &Path, file: &SettingsFile) -> Result<(), ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(file)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 5. Init
// ---------------------------------------------------------------------------

/// Merge `overrides` into the stored settings file and save it.
///
/// Keys left `None` in `overrides` keep their stored value.
pub fn init_at(home: &Path, overrides: SettingsFile) -> Result<Settings, ConfigError> {
    let mut file = load_file_at(home)?;
    file.repo_path = overrides.repo_path.or(file.repo_path);
    file.db_path = overrides.db_path.or(file.db_path);
    file.remote = overrides.remote.or(file.remote);
    file.sync_interval_secs = overrides.sync_interval_secs.or(file.sync_interval_secs);
    file.git_timeout_secs = overrides.git_timeout_secs.or(file.git_timeout_secs);
    save_file_at(home, &file)?;
    Ok(Settings::resolve(home, file))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        assert!(config_path_at(home.path()).ends_with(".casemirror/config.yaml"));
    }

    #[test]
    fn missing_file_resolves_to_defaults() {
        let home = make_home();
        let settings = load_at(home.path()).expect("load");
        assert_eq!(settings.repo_path, default_repo_path_at(home.path()));
        assert_eq!(settings.db_path, default_db_path_at(home.path()));
        assert_eq!(settings.remote, DEFAULT_REMOTE);
        assert_eq!(settings.sync_interval, Duration::from_secs(600));
        assert_eq!(settings.git_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let home = make_home();
        let settings = Settings::resolve(
            home.path(),
            SettingsFile {
                sync_interval_secs: Some(0),
                ..SettingsFile::default()
            },
        );
        assert_eq!(settings.sync_interval, Duration::from_secs(1));
    }

    #[test]
    fn init_keeps_stored_keys_not_overridden() {
        let home = make_home();
        init_at(
            home.path(),
            SettingsFile {
                remote: Some("upstream".into()),
                ..SettingsFile::default()
            },
        )
        .expect("first init");
        let settings = init_at(
            home.path(),
            SettingsFile {
                repo_path: Some(PathBuf::from("/srv/testcases")),
                ..SettingsFile::default()
            },
        )
        .expect("second init");
        assert_eq!(settings.remote, "upstream");
        assert_eq!(settings.repo_path, PathBuf::from("/srv/testcases"));
    }

    #[test]
    fn config_dir_created_with_perms() {
        let home = make_home();
        save_file_at(home.path(), &SettingsFile::default()).expect("save");
        let dir = root_at(home.path());
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
