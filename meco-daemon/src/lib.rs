//! Meco service runtime, wire protocol and process lifecycle management.

mod error;
pub mod host;
pub mod lifecycle;
pub mod liveness;
mod logging;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use host::{DetachedLauncher, Launcher, ProcessTable, ServiceIdentity, StopSignal, SystemProcesses};
pub use lifecycle::{
    Lifecycle, ServiceStatus, StopPolicy, StopStrategy, SystemLifecycle, TurnOff, TurnOn,
};
pub use liveness::{LivenessStore, PidFile};
pub use paths::MecoConfig;
pub use protocol::{
    request_echo, request_start, send_request, EchoReply, MecoRequest, MecoResponse,
};
pub use logging::{init_cli_tracing, init_tracing};
pub use runtime::{accept_loop, run, serve_blocking, Service};
