//! `casemirror init [--repo <dir>] [--db <file>] [--remote <name>] [--interval <secs>]`

use anyhow::{Context, Result};
use clap::Args;

use casemirror_core::settings::{config_path_at, init_at};

use crate::{home_dir, SettingsArgs};

/// Create or update the settings file.
#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Git remote fetched on every reload.
    #[arg(long)]
    pub remote: Option<String>,

    /// Upper bound in seconds for each git invocation.
    #[arg(long, value_name = "SECS")]
    pub git_timeout: Option<u64>,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut overrides = self.settings.as_overrides();
        overrides.remote = self.remote;
        overrides.git_timeout_secs = self.git_timeout;

        let settings = init_at(&home, overrides).context("failed to write config.yaml")?;

        println!("✓ Saved {}", config_path_at(&home).display());
        println!("  repo:     {}", settings.repo_path.display());
        println!("  db:       {}", settings.db_path.display());
        println!("  remote:   {}", settings.remote);
        println!("  interval: {}s", settings.sync_interval.as_secs());
        Ok(())
    }
}
