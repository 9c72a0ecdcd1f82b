use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the service runtime, protocol client and lifecycle
/// management.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("meco protocol error: {0}")]
    Protocol(String),

    #[error("meco service is not running (nothing listening on {addr})")]
    ServiceNotRunning { addr: SocketAddr },

    #[error("failed to launch meco service: {0}")]
    Launch(String),

    #[error("PID record at {path} is not a process id: {content:?}")]
    InvalidPidRecord { path: PathBuf, content: String },

    #[error("failed to signal process {pid}: {detail}")]
    Signal { pid: u32, detail: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
