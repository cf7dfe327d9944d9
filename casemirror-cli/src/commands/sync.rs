//! `casemirror sync`: one reload in this process.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use casemirror_store::Store;
use casemirror_sync::{GitFetcher, ReloadSummary, Reloader};

use crate::{home_dir, SettingsArgs};

/// Arguments for `casemirror sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Emit the reload summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = self.settings.resolve(&home)?;

        let store = Store::open(&settings.db_path)
            .with_context(|| format!("failed to open store {}", settings.db_path.display()))?;
        let fetcher = GitFetcher::new(&settings.repo_path, &settings.remote, settings.git_timeout);
        let reloader = Reloader::new(&settings.repo_path, Box::new(fetcher), store);

        let summary = reloader
            .reload()
            .with_context(|| format!("sync failed for {}", settings.repo_path.display()))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to render summary")?
            );
        } else {
            print_summary(&summary);
        }
        Ok(())
    }
}

pub fn print_summary(summary: &ReloadSummary) {
    let state = if summary.changed {
        "changed".green().bold()
    } else {
        "unchanged".bright_black()
    };
    println!(
        "✓ Synced {} stages, {} test cases at {} ({state}, {} ms)",
        summary.stages, summary.test_cases, summary.revision_id, summary.duration_ms
    );
}
