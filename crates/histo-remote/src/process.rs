//! External process supervision.
//!
//! Starts a helper executable (the remote-care agent, the GUI process) and
//! tracks its lifecycle. Exit is observed without blocking through
//! [`ExternalProcess::poll`] or awaited with [`ExternalProcess::wait`].
//! Termination is polite first: the process gets SIGTERM and a grace
//! period, then it is killed.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use histo_core::{NotificationBus, StateNotification};
use tokio::process::{Child, Command};

use crate::error::{RemoteError, Result};

/// Lifecycle state of an external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Never started
    Stopped,
    /// Running with the given pid
    Running(u32),
    /// Exited with a code, or `None` when ended by a signal
    Exited(Option<i32>),
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running(_))
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => f.write_str("stopped"),
            ProcessState::Running(pid) => write!(f, "running (pid {})", pid),
            ProcessState::Exited(Some(code)) => write!(f, "exited (code {})", code),
            ProcessState::Exited(None) => f.write_str("exited (signal)"),
        }
    }
}

/// A supervised child process.
///
/// The child is killed if the supervisor is dropped while it still runs.
#[derive(Debug)]
pub struct ExternalProcess {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    child: Option<Child>,
    state: ProcessState,
    notifications: Option<NotificationBus>,
}

impl ExternalProcess {
    /// Supervisor for `program`, reported under `name`.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            child: None,
            state: ProcessState::Stopped,
            notifications: None,
        }
    }

    /// Command line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Publish state changes on `bus`.
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.notifications = Some(bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last observed state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Check for an exit without blocking.
    pub fn poll(&mut self) -> Result<ProcessState> {
        if let Some(child) = self.child.as_mut() {
            if let Some(status) = child.try_wait()? {
                self.child = None;
                self.set_state(ProcessState::Exited(status.code()));
            }
        }
        Ok(self.state)
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.poll(), Ok(ProcessState::Running(_)))
    }

    /// Start the process. Fails if it is still running.
    pub fn start(&mut self) -> Result<u32> {
        if self.poll()?.is_running() {
            return Err(RemoteError::AlreadyRunning(self.name.clone()));
        }

        tracing::info!(process = %self.name, program = %self.program.display(), "Starting process");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().unwrap_or(0);
        self.child = Some(child);
        self.set_state(ProcessState::Running(pid));
        Ok(pid)
    }

    /// Wait until the process exits.
    pub async fn wait(&mut self) -> Result<ProcessState> {
        let Some(child) = self.child.as_mut() else {
            return Ok(self.state);
        };
        let status = child.wait().await?;
        self.child = None;
        self.set_state(ProcessState::Exited(status.code()));
        Ok(self.state)
    }

    /// Ask the process to exit, killing it after `grace`.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ProcessState> {
        if !self.poll()?.is_running() {
            return Ok(self.state);
        }

        tracing::info!(process = %self.name, grace_ms = grace.as_millis() as u64, "Terminating process");
        self.send_terminate()?;
        match tokio::time::timeout(grace, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(process = %self.name, "Process ignored terminate, killing");
                self.kill().await
            }
        }
    }

    /// Kill the process immediately.
    pub async fn kill(&mut self) -> Result<ProcessState> {
        let Some(child) = self.child.as_mut() else {
            return Ok(self.state);
        };
        child.kill().await?;
        self.wait().await
    }

    #[cfg(unix)]
    fn send_terminate(&mut self) -> Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.child.as_ref().and_then(|c| c.id()) else {
            return Ok(());
        };
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| RemoteError::Signal {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn send_terminate(&mut self) -> Result<()> {
        if let Some(child) = self.child.as_mut() {
            child.start_kill()?;
        }
        Ok(())
    }

    fn set_state(&mut self, state: ProcessState) {
        if self.state == state {
            return;
        }
        self.state = state;
        tracing::info!(process = %self.name, state = %state, "Process state changed");
        if let Some(bus) = &self.notifications {
            bus.publish(StateNotification::ProcessState {
                process: self.name.clone(),
                state: state.to_string(),
            });
        }
    }
}
