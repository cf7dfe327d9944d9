//! casemirror: mirror of a git-hosted test-case tree, queryable over a
//! local socket.
//!
//! # Usage
//!
//! ```text
//! casemirror init [--repo <dir>] [--db <file>] [--remote <name>] [--interval <secs>]
//! casemirror serve [--repo <dir>] [--db <file>] [--interval <secs>]
//! casemirror sync [--repo <dir>] [--db <file>]
//! casemirror reload
//! casemirror stages [--json]
//! casemirror testcases <stage> [--json]
//! casemirror file <stage> <path>
//! casemirror status
//! casemirror stop
//! ```

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use casemirror_core::settings::{self, SettingsFile};
use casemirror_core::Settings;
use commands::{
    daemon::ServeArgs,
    init::InitArgs,
    query::{FileArgs, StagesArgs, TestcasesArgs},
    sync::SyncArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "casemirror",
    version,
    about = "Mirror a git-hosted test-case tree into SQLite and serve it",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.casemirror/config.yaml, keeping keys not given here.
    Init(InitArgs),

    /// Run the daemon in the foreground (scheduler + query socket).
    Serve(ServeArgs),

    /// Run one reload in this process, without a daemon.
    Sync(SyncArgs),

    /// Ask the running daemon to reload now.
    Reload,

    /// List stages with their test-case counts.
    Stages(StagesArgs),

    /// List the test cases of a stage.
    Testcases(TestcasesArgs),

    /// Print a file from a stage directory.
    File(FileArgs),

    /// Show daemon status.
    Status,

    /// Request graceful daemon shutdown.
    Stop,
}

// ---------------------------------------------------------------------------
// Shared settings overrides
// ---------------------------------------------------------------------------

/// Flags that override `config.yaml` for a single invocation.
#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Root of the external test-case tree (a git checkout).
    #[arg(long, value_name = "DIR")]
    pub repo: Option<PathBuf>,

    /// SQLite store location.
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Seconds between scheduled reloads.
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,
}

impl SettingsArgs {
    /// Stored settings for `home` with these flags applied on top.
    pub fn resolve(&self, home: &Path) -> Result<Settings> {
        let mut file = settings::load_file_at(home).context("failed to load config.yaml")?;
        file.repo_path = self.repo.clone().or(file.repo_path);
        file.db_path = self.db.clone().or(file.db_path);
        file.sync_interval_secs = self.interval.or(file.sync_interval_secs);
        Ok(Settings::resolve(home, file))
    }

    pub fn as_overrides(&self) -> SettingsFile {
        SettingsFile {
            repo_path: self.repo.clone(),
            db_path: self.db.clone(),
            sync_interval_secs: self.interval,
            ..SettingsFile::default()
        }
    }
}

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Serve(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Reload => commands::daemon::reload(),
        Commands::Stages(args) => args.run(),
        Commands::Testcases(args) => args.run(),
        Commands::File(args) => args.run(),
        Commands::Status => commands::daemon::status(),
        Commands::Stop => commands::daemon::stop(),
    }
}
