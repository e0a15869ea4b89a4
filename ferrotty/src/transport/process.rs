//! Local child process running on its own pseudo-terminal.

use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use bytes::Bytes;
use log::{debug, info, warn};
use nix::sys::signal::{SigHandler, Signal, signal};
use pty_process::{Command, Pty};
use tokio::process::Child;

use super::Transport;
use super::config::ProcessConfig;
use super::stream::StreamTransport;
use crate::error::{Result, TransportError};
use crate::session::{TargetStatus, Termination};

/// A spawned child whose stdin, stdout and stderr are one pseudo-terminal.
pub struct ProcessTransport {
    io: StreamTransport<Pty>,
    child: Child,
    pid: Option<u32>,
    status: TargetStatus,
}

impl std::fmt::Debug for ProcessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTransport")
            .field("pid", &self.pid)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Runs in the child between fork and exec.
fn ignore_sighup() -> io::Result<()> {
    // SAFETY: SIG_IGN installs no handler code, and sigaction is
    // async-signal-safe.
    unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) }
        .map(drop)
        .map_err(io::Error::from)
}

impl ProcessTransport {
    /// Spawn the configured program.
    ///
    /// The child becomes a session leader with the new terminal as its
    /// controlling tty, so job-control signals typed on it reach the child.
    pub fn spawn(config: &ProcessConfig) -> Result<Self> {
        let (pty, pts) = pty_process::open()
            .map_err(|e| TransportError::PtyAllocation(io::Error::other(e.to_string())))?;

        let mut cmd = Command::new(&config.program).args(&config.args);
        if let Some(cwd) = &config.cwd {
            cmd = cmd.current_dir(cwd);
        }
        if let Some(env) = &config.env {
            cmd = cmd.env_clear();
            for (key, value) in env {
                cmd = cmd.env(key, value);
            }
        }
        if config.ignore_sighup {
            // SAFETY: the hook only calls sigaction, see ignore_sighup.
            cmd = unsafe { cmd.pre_exec(ignore_sighup) };
        }

        let child = cmd.spawn(pts).map_err(|e| TransportError::Spawn {
            program: config.display_name(),
            source: io::Error::other(e.to_string()),
        })?;
        let pid = child.id();
        info!("spawned {} (pid {:?})", config.display_name(), pid);

        Ok(Self {
            io: StreamTransport::new(pty),
            child,
            pid,
            status: TargetStatus::Running,
        })
    }

    /// The child's process id, while it has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Translate a wait status into a termination cause.
fn termination_from(status: ExitStatus) -> Option<Termination> {
    if let Some(signal) = status.signal() {
        Some(Termination::Signaled(signal))
    } else {
        status.code().map(Termination::Exited)
    }
}

impl Transport for ProcessTransport {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.io.recv().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.io.send(data).await
    }

    fn status(&mut self) -> Result<TargetStatus> {
        if let TargetStatus::Terminated(_) = self.status {
            return Ok(self.status);
        }

        match self.child.try_wait().map_err(TransportError::Io)? {
            Some(exit) => {
                match termination_from(exit) {
                    Some(cause) => {
                        debug!("target {:?} terminated: {:?}", self.pid, cause);
                        self.status = TargetStatus::Terminated(cause);
                    }
                    None => warn!("target {:?} reaped with an unreadable status", self.pid),
                }
                self.pid = None;
            }
            None => self.status = TargetStatus::Running,
        }
        Ok(self.status)
    }

    fn inspects_status(&self) -> bool {
        true
    }

    fn tty_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.io.get_ref().as_fd())
    }

    async fn close(&mut self) -> Result<()> {
        if self.status()? == TargetStatus::Running {
            debug!("killing target {:?} on close", self.pid);
            if let Err(e) = self.child.start_kill() {
                warn!("failed to kill target {:?}: {}", self.pid, e);
            }
            let exit = self.child.wait().await.map_err(TransportError::Io)?;
            if let Some(cause) = termination_from(exit) {
                self.status = TargetStatus::Terminated(cause);
            }
            self.pid = None;
        }
        Ok(())
    }
}
