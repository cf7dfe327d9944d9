//! `casemirror stages|testcases|file`: read the mirrored data.
//!
//! Requests go to the running daemon. Without one, the store and tree named
//! by the settings are read directly.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use casemirror_daemon::{request_file, request_stages, request_testcases, DaemonError};
use casemirror_store::{GitInfo, QueryService, StagesView, Store, TestCasesView};

use crate::{home_dir, SettingsArgs};

/// Arguments for `casemirror stages`.
#[derive(Args, Debug)]
pub struct StagesArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `casemirror testcases`.
#[derive(Args, Debug)]
pub struct TestcasesArgs {
    /// Stage directory name.
    pub stage: String,

    #[command(flatten)]
    pub settings: SettingsArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `casemirror file`.
#[derive(Args, Debug)]
pub struct FileArgs {
    /// Stage directory name.
    pub stage: String,

    /// Path relative to the stage directory.
    pub path: String,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "stage")]
    name: String,
    #[tabled(rename = "cases")]
    cases: i64,
    #[tabled(rename = "last updated")]
    last_updated: String,
}

#[derive(Tabled)]
struct TestcaseRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "active")]
    active: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "input")]
    input: String,
    #[tabled(rename = "output")]
    output: String,
    #[tabled(rename = "exit")]
    exitcode: i64,
}

impl StagesArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let view: StagesView = ask_daemon_or_local(
            &home,
            &self.settings,
            request_stages,
            |q| q.list_stages(),
        )?;

        if self.json {
            return print_json(&view);
        }
        print_git_info(&view.git_info);
        if view.stages.is_empty() {
            println!("No stages. Run `casemirror sync` first.");
            return Ok(());
        }
        let rows: Vec<StageRow> = view
            .stages
            .into_iter()
            .map(|s| StageRow {
                name: s.name,
                cases: s.testcase_count,
                last_updated: s
                    .last_updated
                    .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl TestcasesArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let stage = self.stage.clone();
        let view: TestCasesView = ask_daemon_or_local(
            &home,
            &self.settings,
            |h| request_testcases(h, &stage),
            |q| q.list_test_cases(&stage),
        )?;

        if self.json {
            return print_json(&view);
        }
        print_git_info(&view.git_info);
        if view.testcases.is_empty() {
            println!("No test cases in stage '{}'.", self.stage);
            return Ok(());
        }
        let rows: Vec<TestcaseRow> = view
            .testcases
            .into_iter()
            .map(|t| TestcaseRow {
                active: if t.active {
                    "yes".green().to_string()
                } else {
                    "no".bright_black().to_string()
                },
                source: file_cell(&t.source_path, t.source_visible),
                input: file_cell(&t.input_path, t.input_visible),
                output: file_cell(&t.output_path, t.output_visible),
                exitcode: t.exitcode,
                name: t.name,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

impl FileArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let (stage, path) = (self.stage.clone(), self.path.clone());
        let content: String = match request_file(&home, &stage, &path) {
            Ok(data) => data["content"]
                .as_str()
                .map(str::to_string)
                .context("unexpected file payload from daemon")?,
            Err(DaemonError::DaemonNotRunning { .. }) => local_queries(&home, &self.settings)?
                .read_file(&stage, &path)
                .map_err(|err| anyhow::anyhow!(err.public_message()))?,
            Err(err) => return Err(err).context(format!("cannot read {stage}/{path}")),
        };
        print!("{content}");
        Ok(())
    }
}

/// Ask the daemon; if none is running, run `local` against the store.
fn ask_daemon_or_local<T, R, L>(
    home: &Path,
    settings: &SettingsArgs,
    remote: R,
    local: L,
) -> Result<T>
where
    T: DeserializeOwned,
    R: FnOnce(&Path) -> Result<Value, DaemonError>,
    L: FnOnce(&QueryService) -> Result<T, casemirror_store::QueryError>,
{
    match remote(home) {
        Ok(data) => serde_json::from_value(data).context("unexpected payload from daemon"),
        Err(DaemonError::DaemonNotRunning { .. }) => {
            let queries = local_queries(home, settings)?;
            local(&queries).context("query failed")
        }
        Err(err) => Err(err).context("daemon request failed"),
    }
}

fn local_queries(home: &Path, settings: &SettingsArgs) -> Result<QueryService> {
    let settings = settings.resolve(home)?;
    let store = Store::open(&settings.db_path)
        .with_context(|| format!("failed to open store {}", settings.db_path.display()))?;
    Ok(QueryService::new(store, settings.repo_path))
}

fn print_git_info(info: &GitInfo) {
    let date = info
        .date
        .map(|d| d.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %z").to_string())
        .unwrap_or_else(|| "never synced".to_string());
    println!("{} {} ({date})", "revision".bold(), info.hash);
}

fn file_cell(path: &str, visible: bool) -> String {
    match (path.is_empty(), visible) {
        (true, _) => "-".to_string(),
        (false, true) => path.to_string(),
        (false, false) => format!("{path} (hidden)"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
