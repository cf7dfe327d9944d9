//! `casemirror serve|reload|status|stop`: daemon lifecycle and control.

use anyhow::{Context, Result};
use clap::Args;

use casemirror_daemon::paths::socket_path;
use casemirror_daemon::{request_reload, request_status, request_stop, start_blocking, DaemonError};
use casemirror_sync::ReloadSummary;

use crate::commands::sync::print_summary;
use crate::{home_dir, SettingsArgs};

/// Arguments for `casemirror serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

impl ServeArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let settings = self.settings.resolve(&home)?;
        start_blocking(&home, settings).context("daemon exited with error")
    }
}

pub fn reload() -> Result<()> {
    let home = home_dir()?;
    let data = match request_reload(&home) {
        Ok(data) => data,
        Err(DaemonError::DaemonNotRunning { .. }) => {
            anyhow::bail!("daemon is not running; start it with `casemirror serve` or use `casemirror sync`")
        }
        Err(err) => return Err(err).context("reload failed"),
    };
    let summary: ReloadSummary = serde_json::from_value(data["summary"].clone())
        .context("unexpected reload payload from daemon")?;
    print_summary(&summary);
    Ok(())
}

pub fn stop() -> Result<()> {
    let home = home_dir()?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

pub fn status() -> Result<()> {
    let home = home_dir()?;
    let payload = match request_status(&home) {
        Ok(status) => status,
        Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
            "running": false,
            "socket": socket_path(&home).display().to_string(),
        }),
        Err(err) => return Err(err).context("failed to query daemon status"),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to render daemon status JSON")?
    );
    Ok(())
}
