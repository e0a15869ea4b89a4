//! Liveness and termination cause of a target.

use std::fmt;

use nix::sys::signal::Signal;

/// How a target went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited normally with this status code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => {
                write!(f, "killed by signal {signal} ({})", signal_name(*signal))
            }
        }
    }
}

/// Last known state of a target.
///
/// A target is either running or terminated with a cause, never both.
/// Targets without an inspectable process (plain network peers) are
/// `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Running,
    Terminated(Termination),
    Unknown,
}

impl TargetStatus {
    /// Whether the target is known to be alive.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// The termination cause, if the target is known to be gone.
    pub fn termination(&self) -> Option<Termination> {
        match self {
            Self::Terminated(cause) => Some(*cause),
            _ => None,
        }
    }
}

/// Symbolic name of a signal number, e.g. `SIGSEGV`.
pub fn signal_name(signal: i32) -> &'static str {
    Signal::try_from(signal)
        .map(|s| s.as_str())
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
        assert_eq!(signal_name(0), "Unknown");
        assert_eq!(signal_name(1000), "Unknown");
    }

    #[test]
    fn test_running_and_terminated_are_exclusive() {
        let running = TargetStatus::Running;
        assert!(running.is_running());
        assert_eq!(running.termination(), None);

        let dead = TargetStatus::Terminated(Termination::Signaled(libc::SIGABRT));
        assert!(!dead.is_running());
        assert_eq!(dead.termination(), Some(Termination::Signaled(libc::SIGABRT)));

        assert!(!TargetStatus::Unknown.is_running());
    }

    #[test]
    fn test_termination_display() {
        assert_eq!(Termination::Exited(3).to_string(), "exited with status 3");
        assert_eq!(
            Termination::Signaled(libc::SIGSEGV).to_string(),
            format!("killed by signal {} (SIGSEGV)", libc::SIGSEGV)
        );
    }
}
