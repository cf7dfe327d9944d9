use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};

use casemirror_core::Settings;
use casemirror_store::{QueryError, QueryService, Store};
use casemirror_sync::{Fetcher, GitFetcher, Reloader};

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;
use crate::protocol::{DaemonRequest, DaemonResponse, CODE_BAD_REQUEST, CODE_INTERNAL};
use crate::queue::{
    enqueue_reload, reload_processor_task, LastReloadCell, ReloadJob, ReloadSource, QUEUE_CAPACITY,
};
use crate::scheduler::spawn_scheduler;

/// Everything a socket client handler needs.
#[derive(Clone)]
struct ServerContext {
    home: PathBuf,
    settings: Arc<Settings>,
    queries: QueryService,
    reload_tx: mpsc::Sender<ReloadJob>,
    shutdown_tx: broadcast::Sender<()>,
    last_reload: LastReloadCell,
    started_at: DateTime<Utc>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, settings: Settings) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), settings))
}

/// Run the daemon against the git checkout named by `settings`.
pub async fn run(home: PathBuf, settings: Settings) -> Result<(), DaemonError> {
    let fetcher = GitFetcher::new(&settings.repo_path, &settings.remote, settings.git_timeout);
    run_with_fetcher(home, settings, Box::new(fetcher)).await
}

/// Run the daemon runtime: scheduler, reload processor, socket server and
/// signal handler, until one of them requests shutdown.
pub async fn run_with_fetcher(
    home: PathBuf,
    settings: Settings,
    fetcher: Box<dyn Fetcher>,
) -> Result<(), DaemonError> {
    ensure_socket_dir(&home)?;

    let store = tokio::task::spawn_blocking({
        let db_path = settings.db_path.clone();
        move || Store::open(&db_path)
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("store open join error: {err}")))??;

    let reloader = Arc::new(Reloader::new(&settings.repo_path, fetcher, store.clone()));
    let queries = QueryService::new(store, &settings.repo_path);
    let last_reload: LastReloadCell = Arc::new(RwLock::new(None));

    let (reload_tx, reload_rx) = mpsc::channel::<ReloadJob>(QUEUE_CAPACITY);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        repo = %settings.repo_path.display(),
        db = %settings.db_path.display(),
        interval_secs = settings.sync_interval.as_secs(),
        "casemirror daemon starting",
    );

    let ctx = ServerContext {
        home: home.clone(),
        settings: Arc::new(settings),
        queries,
        reload_tx: reload_tx.clone(),
        shutdown_tx: shutdown_tx.clone(),
        last_reload: last_reload.clone(),
        started_at: Utc::now(),
    };

    let scheduler = spawn_scheduler(
        ctx.settings.sync_interval,
        reload_tx.clone(),
        shutdown_tx.subscribe(),
    );
    drop(reload_tx);

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = scheduler.join().await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let last_reload = last_reload.clone();
        tokio::spawn(async move {
            let result =
                reload_processor_task(reloader, last_reload, reload_rx, shutdown.subscribe())
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(ctx);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, processor_result, socket_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("reload_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("casemirror daemon stopped");
    Ok(())
}

async fn socket_server_task(
    ctx: ServerContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&ctx.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: ServerContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(CODE_BAD_REQUEST, format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = dispatch(&request, &ctx).await;
        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn dispatch(request: &DaemonRequest, ctx: &ServerContext) -> DaemonResponse {
    tracing::debug!(cmd = %request.cmd, "socket request");
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(ctx).await),
        "stages" => {
            let queries = ctx.queries.clone();
            query_response(move || queries.list_stages().map(|view| json!(view))).await
        }
        "testcases" => {
            let Some(stage) = non_empty(&request.stage) else {
                return DaemonResponse::error(CODE_BAD_REQUEST, "Stage name is required");
            };
            let queries = ctx.queries.clone();
            query_response(move || queries.list_test_cases(&stage).map(|view| json!(view))).await
        }
        "file" => {
            let stage = request.stage.clone().unwrap_or_default();
            let path = request.path.clone().unwrap_or_default();
            let queries = ctx.queries.clone();
            query_response(move || {
                queries
                    .read_file(&stage, &path)
                    .map(|content| json!({ "content": content }))
            })
            .await
        }
        "reload" => match enqueue_reload(&ctx.reload_tx, ReloadSource::Manual).await {
            Ok(summary) => DaemonResponse::ok(json!({
                "message": "Sync completed",
                "summary": summary,
            })),
            Err(err) => DaemonResponse::error(CODE_INTERNAL, format!("Sync failed: {err}")),
        },
        "stop" => {
            let _ = ctx.shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(CODE_BAD_REQUEST, format!("unknown command '{other}'")),
    }
}

/// Run a blocking query and map its error onto a response code.
async fn query_response<F>(query: F) -> DaemonResponse
where
    F: FnOnce() -> Result<Value, QueryError> + Send + 'static,
{
    match tokio::task::spawn_blocking(query).await {
        Ok(Ok(data)) => DaemonResponse::ok(data),
        Ok(Err(err)) => {
            if err.status_code() >= CODE_INTERNAL {
                tracing::error!(error = %err, "query failed");
            } else {
                tracing::debug!(error = %err, "query rejected");
            }
            DaemonResponse::error(err.status_code(), err.public_message())
        }
        Err(err) => DaemonResponse::error(CODE_INTERNAL, format!("query task join error: {err}")),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

async fn build_status_payload(ctx: &ServerContext) -> Value {
    let last_reload = ctx.last_reload.read().await.clone();
    json!({
        "running": true,
        "started_at": ctx.started_at,
        "socket": socket_path(&ctx.home).display().to_string(),
        "repo_path": ctx.settings.repo_path.display().to_string(),
        "db_path": ctx.settings.db_path.display().to_string(),
        "sync_interval_secs": ctx.settings.sync_interval.as_secs(),
        "last_reload": last_reload,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

/// The socket's parent exists even when the store lives elsewhere.
fn ensure_socket_dir(home: &Path) -> Result<(), DaemonError> {
    let socket = socket_path(home);
    match socket.parent() {
        Some(dir) if !dir.exists() => fs::create_dir_all(dir).map_err(|e| io_err(dir, e)),
        _ => Ok(()),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
