//! Access to the external tree's version control.
//!
//! [`GitFetcher`] shells out to the system `git`, which picks up SSH keys,
//! credential helpers and `~/.gitconfig` on its own. Every invocation is
//! bounded by a timeout; a hung `git` is killed and reported as
//! [`FetchError::Timeout`].

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use casemirror_core::types::Revision;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Failures talking to the external tree's version control.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("unexpected git output: {0}")]
    Parse(String),
}

/// Source of external-tree state for a reload.
pub trait Fetcher: Send + Sync {
    /// Bring the tree up to date with upstream.
    fn advance(&self) -> Result<(), FetchError>;

    /// Identifier and timestamp of the tree's current head.
    fn current_revision(&self) -> Result<Revision, FetchError>;
}

/// Current revision, or the `"unknown"` sentinel if it cannot be resolved.
pub fn resolve_revision(fetcher: &dyn Fetcher) -> Revision {
    match fetcher.current_revision() {
        Ok(revision) => revision,
        Err(err) => {
            tracing::warn!("cannot resolve revision, recording 'unknown': {err}");
            Revision::unknown()
        }
    }
}

// ---------------------------------------------------------------------------
// GitFetcher
// ---------------------------------------------------------------------------

/// [`Fetcher`] backed by a git checkout.
#[derive(Debug, Clone)]
pub struct GitFetcher {
    repo: PathBuf,
    remote: String,
    timeout: Duration,
}

impl GitFetcher {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>, timeout: Duration) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
            timeout,
        }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn hint_stale_lock(&self, err: FetchError) -> FetchError {
        if mentions_stale_lock(&err) {
            tracing::warn!(
                "git reports a held index lock in {}; if no git process is running, \
                 remove {} and the next reload will retry",
                self.repo.display(),
                self.repo.join(".git").join("index.lock").display()
            );
        }
        err
    }

    fn git(&self, args: &[&str]) -> Result<Output, FetchError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let child = Command::new("git")
            .arg("-C")
            .arg(&self.repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FetchError::Spawn {
                command: command.clone(),
                source,
            })?;

        let output = wait_with_timeout(child, self.timeout).map_err(|err| match err {
            WaitError::TimedOut => FetchError::Timeout {
                command: command.clone(),
                timeout: self.timeout,
            },
            WaitError::Io(source) => FetchError::Spawn {
                command: command.clone(),
                source,
            },
        })?;

        if !output.status.success() {
            return Err(FetchError::Command {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Fetcher for GitFetcher {
    /// `fetch`, then `merge --ff-only FETCH_HEAD`. Only the merge takes the
    /// index lock, so a fetch killed at the timeout leaves no `index.lock`.
    fn advance(&self) -> Result<(), FetchError> {
        self.git(&["fetch", "--quiet", &self.remote])
            .map_err(|err| self.hint_stale_lock(err))?;
        self.git(&["merge", "--ff-only", "--quiet", "FETCH_HEAD"])
            .map_err(|err| self.hint_stale_lock(err))?;
        tracing::info!("fast-forwarded {} from {}", self.repo.display(), self.remote);
        Ok(())
    }

    fn current_revision(&self) -> Result<Revision, FetchError> {
        let output = self.git(&["log", "-1", "--format=%H%x00%cI"])?;
        parse_log_line(&String::from_utf8_lossy(&output.stdout))
    }
}

fn mentions_stale_lock(err: &FetchError) -> bool {
    matches!(err, FetchError::Command { stderr, .. } if stderr.contains("index.lock"))
}

/// Parse `<hash>\0<committer date, strict ISO 8601>`.
fn parse_log_line(line: &str) -> Result<Revision, FetchError> {
    let line = line.trim();
    let (hash, date) = line
        .split_once('\0')
        .ok_or_else(|| FetchError::Parse(format!("no revision in {line:?}")))?;
    if hash.is_empty() {
        return Err(FetchError::Parse("empty revision hash".to_string()));
    }
    let timestamp = DateTime::parse_from_rfc3339(date)
        .map_err(|e| FetchError::Parse(format!("bad commit date {date:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(Revision {
        id: hash.to_string(),
        timestamp,
    })
}

// ---------------------------------------------------------------------------
// Bounded child processes
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum WaitError {
    TimedOut,
    Io(std::io::Error),
}

/// Wait for `child` to exit, killing it once `timeout` elapses.
///
/// stdout and stderr are drained on helper threads so a chatty child cannot
/// block on a full pipe.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<Output, WaitError> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait().map_err(WaitError::Io)? {
            Some(status) => break status,
            None if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(WaitError::TimedOut);
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Fetcher for Broken {
        fn advance(&self) -> Result<(), FetchError> {
            Err(FetchError::Parse("offline".into()))
        }
        fn current_revision(&self) -> Result<Revision, FetchError> {
            Err(FetchError::Parse("no head".into()))
        }
    }

    #[test]
    fn resolve_revision_degrades_to_unknown() {
        let before = Utc::now();
        let revision = resolve_revision(&Broken);
        assert!(revision.is_unknown());
        assert!(revision.timestamp >= before);
    }

    #[test]
    fn parses_log_line() {
        let revision =
            parse_log_line("3f2c1a9e\u{0}2025-08-30T14:05:09+08:00\n").expect("parse");
        assert_eq!(revision.id, "3f2c1a9e");
        assert_eq!(revision.timestamp.to_rfc3339(), "2025-08-30T06:05:09+00:00");
    }

    #[test]
    fn rejects_malformed_log_line() {
        assert!(matches!(parse_log_line(""), Err(FetchError::Parse(_))));
        assert!(matches!(
            parse_log_line("abc\u{0}not-a-date"),
            Err(FetchError::Parse(_))
        ));
    }

    #[test]
    fn non_repository_reports_command_failure() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = GitFetcher::new(tmp.path(), "origin", Duration::from_secs(10));
        match fetcher.current_revision() {
            Err(FetchError::Command { .. }) | Err(FetchError::Spawn { .. }) => {}
            other => panic!("expected git failure, got {other:?}"),
        }
        assert!(resolve_revision(&fetcher).is_unknown());
    }

    #[test]
    fn index_lock_failures_are_recognised() {
        let locked = FetchError::Command {
            command: "merge".into(),
            stderr: "fatal: Unable to create '/r/.git/index.lock': File exists.".into(),
        };
        assert!(mentions_stale_lock(&locked));

        let offline = FetchError::Command {
            command: "fetch".into(),
            stderr: "could not resolve host".into(),
        };
        assert!(!mentions_stale_lock(&offline));
        assert!(!mentions_stale_lock(&FetchError::Timeout {
            command: "fetch".into(),
            timeout: Duration::from_secs(1),
        }));
    }

    #[test]
    fn advance_fails_at_fetch_outside_a_repository() {
        let tmp = tempfile::TempDir::new().unwrap();
        let fetcher = GitFetcher::new(tmp.path(), "origin", Duration::from_secs(10));
        match fetcher.advance() {
            Err(FetchError::Command { command, .. }) => assert_eq!(command, "fetch"),
            Err(FetchError::Spawn { .. }) => {}
            other => panic!("expected git failure, got {other:?}"),
        }
    }

    #[test]
    #[cfg(unix)]
    fn hung_child_is_killed_at_timeout() {
        let child = Command::new("sleep")
            .arg("5")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sleep");
        let started = Instant::now();
        let result = wait_with_timeout(child, Duration::from_millis(100));
        assert!(matches!(result, Err(WaitError::TimedOut)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    #[cfg(unix)]
    fn finished_child_output_is_collected() {
        let child = Command::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawn sh");
        let output = wait_with_timeout(child, Duration::from_secs(5)).expect("output");
        assert!(output.status.success());
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr, b"err\n");
    }
}
