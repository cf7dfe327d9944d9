use std::path::{Path, PathBuf};

use casemirror_core::settings::root_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.casemirror/daemon.sock`
pub fn socket_path(home: &Path) -> PathBuf {
    root_at(home).join(DAEMON_SOCKET)
}
