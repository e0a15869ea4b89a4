//! Mirroring a target's death onto the automation program itself.

use std::time::Duration;

use log::{info, warn};
use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use nix::unistd::{Pid, getpid};

/// The process that dies the same way its target did.
///
/// Injected into a session so tests can observe mirroring without taking
/// the test runner down.
pub trait Mirror: Send + Sync {
    /// Exit with `code`.
    fn exit(&self, code: i32);

    /// Terminate by `signal`.
    fn kill(&self, signal: i32);
}

/// The running program, identified by the pid captured at construction.
#[derive(Debug, Clone, Copy)]
pub struct CurrentProcess {
    pid: Pid,
}

impl CurrentProcess {
    pub fn new() -> Self {
        Self { pid: getpid() }
    }

    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }
}

impl Default for CurrentProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl Mirror for CurrentProcess {
    fn exit(&self, code: i32) {
        info!("exiting with status {}", code);
        std::process::exit(code);
    }

    fn kill(&self, signal: i32) {
        match Signal::try_from(signal) {
            Ok(sig) => {
                info!("killing ourself (pid {}) with {}", self.pid, sig);
                // The runtime may have installed handlers (SIGSEGV guard
                // pages) that would swallow a self-sent signal.
                // SAFETY: resetting to the default disposition installs no code.
                if let Err(e) = unsafe { signal::signal(sig, SigHandler::SigDfl) } {
                    warn!("could not reset {} disposition: {}", sig, e);
                }
                let mut set = SigSet::empty();
                set.add(sig);
                if let Err(e) = set.thread_unblock() {
                    warn!("could not unblock {}: {}", sig, e);
                }
                if let Err(e) = signal::kill(self.pid, sig) {
                    warn!("kill({}, {}) failed: {}", self.pid, sig, e);
                }
                // Delivery to another thread is asynchronous.
                std::thread::sleep(Duration::from_millis(100));
                warn!("still alive after {}, exiting instead", sig);
            }
            Err(_) => warn!("cannot mirror unknown signal {}", signal),
        }
        std::process::exit(128 + signal);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// A mirror that records what it was asked to do.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingMirror {
        pub(crate) calls: Mutex<Vec<Mirrored>>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum Mirrored {
        Exit(i32),
        Kill(i32),
    }

    impl RecordingMirror {
        pub(crate) fn calls(&self) -> Vec<Mirrored> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Mirror for RecordingMirror {
        fn exit(&self, code: i32) {
            self.calls.lock().unwrap().push(Mirrored::Exit(code));
        }

        fn kill(&self, signal: i32) {
            self.calls.lock().unwrap().push(Mirrored::Kill(signal));
        }
    }

    #[test]
    fn test_current_process_pid() {
        assert_eq!(CurrentProcess::new().pid(), std::process::id() as i32);
    }

    const CHILD_ACTION: &str = "FERROTTY_MIRROR_CHILD";

    /// Does nothing unless re-executed by `run_child`, then mirrors for real.
    #[test]
    fn test_mirror_child() {
        let Ok(action) = std::env::var(CHILD_ACTION) else {
            return;
        };
        let process = CurrentProcess::new();
        match action.split_once(':') {
            Some(("kill", signal)) => process.kill(signal.parse().unwrap()),
            Some(("exit", code)) => process.exit(code.parse().unwrap()),
            _ => panic!("unknown action {action}"),
        }
    }

    fn run_child(action: &str) -> std::process::ExitStatus {
        std::process::Command::new(std::env::current_exe().unwrap())
            .args([
                "--exact",
                "session::mirror::tests::test_mirror_child",
                "--test-threads=1",
                "--quiet",
            ])
            .env(CHILD_ACTION, action)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap()
    }

    #[test]
    fn test_current_process_kill_dies_by_signal() {
        use std::os::unix::process::ExitStatusExt;

        for signal in [libc::SIGSEGV, libc::SIGABRT, libc::SIGTERM] {
            let status = run_child(&format!("kill:{signal}"));
            assert_eq!(status.signal(), Some(signal), "{status:?}");
        }
    }

    #[test]
    fn test_current_process_exit_code() {
        let status = run_child("exit:42");
        assert_eq!(status.code(), Some(42));
    }
}
