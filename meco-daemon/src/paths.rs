use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SERVICE_PROGRAM: &str = "meco";
pub const SERVE_ARG: &str = "serve";
pub const RUNTIME_DIR_FLAG: &str = "--runtime-dir";
pub const PORT_FLAG: &str = "--port";

pub const RUNTIME_DIR_ENV: &str = "MECO_RUNTIME_DIR";
pub const PORT_ENV: &str = "MECO_PORT";
pub const LOG_FORMAT_ENV: &str = "MECO_LOG_FORMAT";
pub const DEFAULT_PORT: u16 = 50051;

pub const PID_FILE: &str = "meco_server.pid";
pub const STORAGE_DIR: &str = "meco_uploads";
pub const LOGS_DIR: &str = "meco_logs";
pub const STDOUT_LOG: &str = "meco.log";
pub const STDERR_LOG: &str = "meco-err.log";

/// Concurrent request workers in the service.
pub const MAX_WORKERS: usize = 10;
/// Longest request line the service buffers.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
/// How long shutdown waits for in-flight requests.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
/// Sweep stop: poll interval and attempts before escalating to SIGKILL.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const STOP_POLL_ATTEMPTS: u32 = 5;
/// How long `on` waits for a freshly launched service to accept connections.
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runtime directory used when neither flag nor environment names one.
pub fn default_runtime_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn pid_file_path(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(PID_FILE)
}

pub fn storage_dir(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(STORAGE_DIR)
}

pub fn logs_dir(runtime_dir: &Path) -> PathBuf {
    runtime_dir.join(LOGS_DIR)
}

pub fn stdout_log_path(runtime_dir: &Path) -> PathBuf {
    logs_dir(runtime_dir).join(STDOUT_LOG)
}

pub fn stderr_log_path(runtime_dir: &Path) -> PathBuf {
    logs_dir(runtime_dir).join(STDERR_LOG)
}

/// Where the service keeps its state and where it listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MecoConfig {
    pub runtime_dir: PathBuf,
    pub addr: SocketAddr,
}

impl MecoConfig {
    /// Loopback listener on `port`; the endpoint is never exposed beyond the host.
    pub fn new(runtime_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            addr: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }

    pub fn pid_file(&self) -> PathBuf {
        pid_file_path(&self.runtime_dir)
    }

    pub fn storage_dir(&self) -> PathBuf {
        storage_dir(&self.runtime_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        logs_dir(&self.runtime_dir)
    }

    pub fn stdout_log(&self) -> PathBuf {
        stdout_log_path(&self.runtime_dir)
    }

    pub fn stderr_log(&self) -> PathBuf {
        stderr_log_path(&self.runtime_dir)
    }
}

impl Default for MecoConfig {
    fn default() -> Self {
        Self::new(default_runtime_dir(), DEFAULT_PORT)
    }
}
