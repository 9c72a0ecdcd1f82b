//! Host-platform process facilities: finding and signalling service
//! processes, and launching a detached service instance.

use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

use crate::error::{io_err, DaemonError};
use crate::paths::{
    default_runtime_dir, MecoConfig, PORT_FLAG, READY_POLL_INTERVAL, READY_TIMEOUT,
    RUNTIME_DIR_ENV, RUNTIME_DIR_FLAG, SERVE_ARG, SERVICE_PROGRAM,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM.
    Terminate,
    /// SIGKILL.
    Kill,
}

/// Process inspection and signalling.
pub trait ProcessTable {
    fn is_alive(&self, pid: u32) -> bool;
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DaemonError>;
    /// Every process whose command line identifies it as this service.
    fn find_service(&self, identity: &ServiceIdentity) -> Vec<u32>;
    /// Whether `pid` is alive and runs this program's serve role, whatever
    /// runtime directory it serves.
    fn is_service(&self, pid: u32, identity: &ServiceIdentity) -> bool;
}

impl<T: ProcessTable + ?Sized> ProcessTable for &T {
    fn is_alive(&self, pid: u32) -> bool {
        (**self).is_alive(pid)
    }

    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DaemonError> {
        (**self).signal(pid, signal)
    }

    fn find_service(&self, identity: &ServiceIdentity) -> Vec<u32> {
        (**self).find_service(identity)
    }

    fn is_service(&self, pid: u32, identity: &ServiceIdentity) -> bool {
        (**self).is_service(pid, identity)
    }
}

/// Starts a service instance that outlives the caller.
pub trait Launcher {
    /// Spawn the service and return its PID.
    fn launch(&self) -> Result<u32, DaemonError>;
    /// Block until the launched service accepts connections.
    fn await_ready(&self, pid: u32) -> Result<(), DaemonError>;
}

impl<T: Launcher + ?Sized> Launcher for &T {
    fn launch(&self) -> Result<u32, DaemonError> {
        (**self).launch()
    }

    fn await_ready(&self, pid: u32) -> Result<(), DaemonError> {
        (**self).await_ready(pid)
    }
}

// ---------------------------------------------------------------------------
// Service identity
// ---------------------------------------------------------------------------

/// How a service process is recognised from its command line and environment.
///
/// A process matches when its program name is `program`, it was invoked with
/// the `serve` role argument and it serves the same runtime directory. The
/// directory comes from `--runtime-dir`, then from `MECO_RUNTIME_DIR` in the
/// process environment, then the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub program: OsString,
    pub runtime_dir: PathBuf,
    /// Never matched; the process running the stop command.
    pub exclude_pid: u32,
}

impl ServiceIdentity {
    pub fn for_config(config: &MecoConfig) -> Self {
        let program = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_name().map(OsStr::to_os_string))
            .unwrap_or_else(|| OsString::from(SERVICE_PROGRAM));
        Self {
            program,
            runtime_dir: config.runtime_dir.clone(),
            exclude_pid: std::process::id(),
        }
    }

    pub fn matches(&self, pid: u32, cmd: &[OsString], environ: &[OsString]) -> bool {
        if pid == self.exclude_pid || !self.is_serve_command(cmd) {
            return false;
        }
        let runtime_dir = runtime_dir_arg(&cmd[1..])
            .or_else(|| runtime_dir_env(environ))
            .unwrap_or_else(default_runtime_dir);
        same_dir(&runtime_dir, &self.runtime_dir)
    }

    /// `program ... serve ...`, for any runtime directory.
    pub fn is_serve_command(&self, cmd: &[OsString]) -> bool {
        let Some(program) = cmd.first() else {
            return false;
        };
        Path::new(program).file_name() == Some(self.program.as_os_str())
            && cmd.iter().skip(1).any(|arg| arg == SERVE_ARG)
    }
}

/// Arguments that make `program` run the service for `config`.
///
/// Both flags are always spelled out so the command line carries the
/// instance identity.
pub fn serve_args(config: &MecoConfig) -> Vec<OsString> {
    vec![
        OsString::from(SERVE_ARG),
        OsString::from(RUNTIME_DIR_FLAG),
        config.runtime_dir.clone().into_os_string(),
        OsString::from(PORT_FLAG),
        OsString::from(config.addr.port().to_string()),
    ]
}

fn runtime_dir_arg(args: &[OsString]) -> Option<PathBuf> {
    let prefix = format!("{RUNTIME_DIR_FLAG}=");
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == RUNTIME_DIR_FLAG {
            return iter.next().map(PathBuf::from);
        }
        if let Some(value) = arg.to_str().and_then(|s| s.strip_prefix(&prefix)) {
            return Some(PathBuf::from(value));
        }
    }
    None
}

fn runtime_dir_env(environ: &[OsString]) -> Option<PathBuf> {
    let prefix = format!("{RUNTIME_DIR_ENV}=");
    environ
        .iter()
        .filter_map(|var| var.to_str())
        .find_map(|var| var.strip_prefix(&prefix))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn same_dir(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// System process table
// ---------------------------------------------------------------------------

/// [`ProcessTable`] over the live system process list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcesses;

impl ProcessTable for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        // An exited child that has not been reaped yet still shows up.
        matches!(system.process(pid), Some(proc) if proc.status() != ProcessStatus::Zombie)
    }

    #[cfg(unix)]
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DaemonError> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid as NixPid;

        let raw = i32::try_from(pid).map_err(|_| DaemonError::Signal {
            pid,
            detail: "pid out of range".to_string(),
        })?;
        let signal = match signal {
            StopSignal::Terminate => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        kill(NixPid::from_raw(raw), signal).map_err(|errno| DaemonError::Signal {
            pid,
            detail: errno.desc().to_string(),
        })
    }

    #[cfg(not(unix))]
    fn signal(&self, pid: u32, signal: StopSignal) -> Result<(), DaemonError> {
        let mut system = System::new();
        let spid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[spid]), true);
        let proc = system.process(spid).ok_or_else(|| DaemonError::Signal {
            pid,
            detail: "no such process".to_string(),
        })?;
        let sent = match signal {
            StopSignal::Terminate => proc.kill_with(sysinfo::Signal::Term).unwrap_or(false),
            StopSignal::Kill => proc.kill(),
        };
        if sent {
            Ok(())
        } else {
            Err(DaemonError::Signal {
                pid,
                detail: "signal not delivered".to_string(),
            })
        }
    }

    fn find_service(&self, identity: &ServiceIdentity) -> Vec<u32> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_environ(UpdateKind::Always),
        );

        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(_, proc)| proc.thread_kind().is_none())
            .filter(|(_, proc)| proc.status() != ProcessStatus::Zombie)
            .filter_map(|(pid, proc)| {
                let pid = pid.as_u32();
                identity.matches(pid, proc.cmd(), proc.environ()).then_some(pid)
            })
            .collect();
        pids.sort_unstable();
        pids
    }

    fn is_service(&self, pid: u32, identity: &ServiceIdentity) -> bool {
        let spid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[spid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        matches!(
            system.process(spid),
            Some(proc) if proc.status() != ProcessStatus::Zombie && identity.is_serve_command(proc.cmd())
        )
    }
}

// ---------------------------------------------------------------------------
// Detached launcher
// ---------------------------------------------------------------------------

/// Re-executes the current binary as `meco serve` in a new session with its
/// output appended to the service log files.
#[derive(Debug)]
pub struct DetachedLauncher {
    config: MecoConfig,
    program: PathBuf,
    child: Mutex<Option<Child>>,
}

impl DetachedLauncher {
    pub fn new(config: MecoConfig) -> Result<Self, DaemonError> {
        let program = std::env::current_exe().map_err(|e| io_err("current executable", e))?;
        Ok(Self::with_program(config, program))
    }

    pub fn with_program(config: MecoConfig, program: impl Into<PathBuf>) -> Self {
        Self {
            config,
            program: program.into(),
            child: Mutex::new(None),
        }
    }

    fn child_exit_status(&self) -> Result<Option<std::process::ExitStatus>, DaemonError> {
        let mut guard = self.child.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(child) => child.try_wait().map_err(|e| io_err(&self.program, e)),
            None => Ok(None),
        }
    }
}

impl Launcher for DetachedLauncher {
    fn launch(&self) -> Result<u32, DaemonError> {
        let logs = self.config.logs_dir();
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
        let stdout = append_log(&self.config.stdout_log())?;
        let stderr = append_log(&self.config.stderr_log())?;

        let mut command = Command::new(&self.program);
        command
            .args(serve_args(&self.config))
            .current_dir("/")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        detach(&mut command);

        let child = command
            .spawn()
            .map_err(|e| DaemonError::Launch(format!("{}: {e}", self.program.display())))?;
        let pid = child.id();
        *self.child.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);
        tracing::debug!(pid, program = %self.program.display(), "launched detached service");
        Ok(pid)
    }

    fn await_ready(&self, pid: u32) -> Result<(), DaemonError> {
        let deadline = Instant::now() + READY_TIMEOUT;
        loop {
            if let Some(status) = self.child_exit_status()? {
                return Err(DaemonError::Launch(format!(
                    "service (PID {pid}) exited during startup with {status}; see {}",
                    self.config.stderr_log().display()
                )));
            }
            if TcpStream::connect_timeout(&self.config.addr, READY_POLL_INTERVAL).is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DaemonError::Launch(format!(
                    "service (PID {pid}) not accepting connections on {} after {}s",
                    self.config.addr,
                    READY_TIMEOUT.as_secs()
                )));
            }
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }
}

fn append_log(path: &Path) -> Result<fs::File, DaemonError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}

/// Start the child in its own session so it survives the launching terminal.
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}
