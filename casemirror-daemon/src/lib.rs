//! casemirror daemon: periodic reloads, a single reload queue, and the query
//! socket.

mod error;
pub mod paths;
pub mod protocol;
pub mod queue;
mod runtime;
pub mod scheduler;

pub use error::DaemonError;
pub use protocol::{
    request_file, request_reload, request_stages, request_status, request_stop,
    request_testcases, send_request, DaemonRequest, DaemonResponse,
};
pub use queue::{LastReload, ReloadSource};
pub use runtime::{run, run_with_fetcher, start_blocking};
pub use scheduler::{spawn_scheduler, SchedulerHandle};
