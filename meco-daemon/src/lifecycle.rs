//! Turning the service on and off.
//!
//! Every check-then-act sequence on the liveness record lives here. None of
//! them are atomic: two `turn_on` calls racing each other can both find the
//! record absent and both launch. The port bind in the service makes the
//! loser exit, and `turn_off` sweeps by process identity so nothing survives
//! a stop either way.

use std::time::Duration;

use serde::Serialize;

use crate::error::DaemonError;
use crate::host::{DetachedLauncher, Launcher, ProcessTable, ServiceIdentity, StopSignal, SystemProcesses};
use crate::liveness::{self, LivenessStore, PidFile};
use crate::paths::{MecoConfig, STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopStrategy {
    /// Signal only the process named by the liveness record.
    Targeted,
    /// Signal every process running this service, escalating to SIGKILL.
    #[default]
    Sweep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnOn {
    AlreadyOn { pid: u32 },
    Started { pid: u32, stale_removed: Option<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnOff {
    /// Nothing was running. `record_removed` is set when a record naming no
    /// live service process was cleaned up on the way; a live recorded
    /// service is always stopped instead.
    AlreadyOff { record_removed: bool },
    Stopped { terminated: Vec<u32>, killed: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub record: Option<u32>,
    pub record_alive: bool,
    pub instances: Vec<u32>,
}

/// How long a sweep waits for SIGTERM to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub interval: Duration,
    pub attempts: u32,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            interval: STOP_POLL_INTERVAL,
            attempts: STOP_POLL_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Absent,
    Alive(u32),
    /// The record names a dead process, or is unreadable.
    Stale(Option<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stopped {
    Terminated,
    Killed,
}

pub struct Lifecycle<S, P, L> {
    store: S,
    processes: P,
    launcher: L,
    identity: ServiceIdentity,
    policy: StopPolicy,
}

/// Lifecycle wired to the real PID file, process table and launcher.
pub type SystemLifecycle = Lifecycle<PidFile, SystemProcesses, DetachedLauncher>;

impl SystemLifecycle {
    pub fn for_config(config: &MecoConfig) -> Result<Self, DaemonError> {
        Ok(Lifecycle::new(
            PidFile::new(config.pid_file()),
            SystemProcesses,
            DetachedLauncher::new(config.clone())?,
            ServiceIdentity::for_config(config),
        ))
    }
}

impl<S, P, L> Lifecycle<S, P, L>
where
    S: LivenessStore,
    P: ProcessTable,
    L: Launcher,
{
    pub fn new(store: S, processes: P, launcher: L, identity: ServiceIdentity) -> Self {
        Self {
            store,
            processes,
            launcher,
            identity,
            policy: StopPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StopPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// OFF → RUNNING. Idempotent: an alive record short-circuits.
    pub fn turn_on(&self) -> Result<TurnOn, DaemonError> {
        let stale_removed = match self.record_state()? {
            RecordState::Alive(pid) => {
                tracing::warn!(pid, "meco service is already on");
                return Ok(TurnOn::AlreadyOn { pid });
            }
            RecordState::Stale(pid) => {
                tracing::info!(pid = ?pid, "removing stale PID record");
                self.store.remove()?;
                pid
            }
            RecordState::Absent => None,
        };

        let pid = self.launcher.launch()?;
        if let Err(err) = self.store.write(pid) {
            tracing::error!(pid, error = %err, "could not record launched service; stopping it");
            if let Err(kill) = self.processes.signal(pid, StopSignal::Kill) {
                tracing::warn!(pid, error = %kill, "failed to stop unrecorded service");
            }
            return Err(err);
        }

        if let Err(err) = self.launcher.await_ready(pid) {
            if let Err(cleanup) = liveness::remove_if_owned(&self.store, pid) {
                tracing::warn!(pid, error = %cleanup, "failed to remove PID record after launch failure");
            }
            return Err(err);
        }

        tracing::info!(pid, "meco service turned on in background");
        Ok(TurnOn::Started { pid, stale_removed })
    }

    /// RUNNING → OFF.
    pub fn turn_off(&self, strategy: StopStrategy) -> Result<TurnOff, DaemonError> {
        match strategy {
            StopStrategy::Targeted => self.turn_off_targeted(),
            StopStrategy::Sweep => self.turn_off_sweep(),
        }
    }

    pub fn status(&self) -> Result<ServiceStatus, DaemonError> {
        let (record, record_alive) = match self.record_state()? {
            RecordState::Absent => (None, false),
            RecordState::Alive(pid) => (Some(pid), true),
            RecordState::Stale(pid) => (pid, false),
        };
        let mut instances = self.processes.find_service(&self.identity);
        if let Some(pid) = record.filter(|_| record_alive) {
            self.include_recorded(&mut instances, pid);
        }
        Ok(ServiceStatus {
            record,
            record_alive,
            instances,
        })
    }

    fn turn_off_targeted(&self) -> Result<TurnOff, DaemonError> {
        let pid = match self.record_state()? {
            RecordState::Absent => {
                tracing::warn!("no PID record found; meco service might be off already");
                return Ok(TurnOff::AlreadyOff {
                    record_removed: false,
                });
            }
            RecordState::Stale(pid) => {
                tracing::warn!(pid = ?pid, "service process not found; removing stale PID record");
                let removed = self.store.remove()?;
                return Ok(TurnOff::AlreadyOff {
                    record_removed: removed,
                });
            }
            RecordState::Alive(pid) => pid,
        };

        tracing::info!(pid, "turning off meco service");
        if let Err(err) = self.processes.signal(pid, StopSignal::Terminate) {
            tracing::warn!(pid, error = %err, "graceful termination failed");
        }
        self.store.remove()?;
        Ok(TurnOff::Stopped {
            terminated: vec![pid],
            killed: Vec::new(),
        })
    }

    fn turn_off_sweep(&self) -> Result<TurnOff, DaemonError> {
        let mut pids = self.processes.find_service(&self.identity);
        match self.record_state() {
            Ok(RecordState::Alive(pid)) => self.include_recorded(&mut pids, pid),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "could not read PID record; sweeping by identity only"),
        }
        let mut terminated = Vec::new();
        let mut killed = Vec::new();

        for pid in pids {
            match self.stop_process(pid) {
                Stopped::Terminated => terminated.push(pid),
                Stopped::Killed => killed.push(pid),
            }
        }

        let record_removed = self.store.remove()?;
        if terminated.is_empty() && killed.is_empty() {
            tracing::warn!("no running meco service found; already off");
            return Ok(TurnOff::AlreadyOff { record_removed });
        }

        tracing::info!(?terminated, ?killed, "meco service turned off");
        Ok(TurnOff::Stopped { terminated, killed })
    }

    fn stop_process(&self, pid: u32) -> Stopped {
        tracing::info!(pid, "sending SIGTERM");
        if let Err(err) = self.processes.signal(pid, StopSignal::Terminate) {
            tracing::warn!(pid, error = %err, "graceful termination failed");
        }

        for _ in 0..self.policy.attempts {
            if !self.processes.is_alive(pid) {
                return Stopped::Terminated;
            }
            std::thread::sleep(self.policy.interval);
        }
        if !self.processes.is_alive(pid) {
            return Stopped::Terminated;
        }

        tracing::warn!(pid, "process still alive after SIGTERM; sending SIGKILL");
        if let Err(err) = self.processes.signal(pid, StopSignal::Kill) {
            tracing::warn!(pid, error = %err, "forceful termination failed");
        }
        Stopped::Killed
    }

    /// Add the recorded PID when it is a live service that the identity scan
    /// missed, e.g. one whose runtime directory could not be read.
    fn include_recorded(&self, pids: &mut Vec<u32>, pid: u32) {
        if pid == self.identity.exclude_pid || pids.contains(&pid) {
            return;
        }
        if self.processes.is_service(pid, &self.identity) {
            tracing::warn!(pid, "recorded service not matched by runtime directory; including it");
            pids.push(pid);
            pids.sort_unstable();
        }
    }

    fn record_state(&self) -> Result<RecordState, DaemonError> {
        match self.store.read() {
            Ok(None) => Ok(RecordState::Absent),
            Ok(Some(pid)) if self.processes.is_alive(pid) => Ok(RecordState::Alive(pid)),
            Ok(Some(pid)) => Ok(RecordState::Stale(Some(pid))),
            Err(err @ DaemonError::InvalidPidRecord { .. }) => {
                tracing::warn!(error = %err, "ignoring unreadable PID record");
                Ok(RecordState::Stale(None))
            }
            Err(err) => Err(err),
        }
    }
}
