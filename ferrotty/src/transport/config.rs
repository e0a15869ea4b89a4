//! Channel origin configuration.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

/// Default timeout for connecting to a remote peer.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A local program to run on a fresh pseudo-terminal.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Program to execute (looked up in `PATH` when not a path).
    pub program: OsString,

    /// Arguments, not including the program name.
    pub args: Vec<OsString>,

    /// Working directory for the child.
    pub cwd: Option<PathBuf>,

    /// Replacement environment. `None` inherits ours.
    pub env: Option<Vec<(OsString, OsString)>>,

    /// Whether the child ignores SIGHUP, so it survives us closing the
    /// terminal.
    pub ignore_sighup: bool,
}

impl ProcessConfig {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: None,
            ignore_sighup: true,
        }
    }

    /// Human-readable program name for diagnostics.
    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}

/// A plain network peer.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// Target port.
    pub port: u16,

    /// Connection timeout.
    pub timeout: Duration,
}

impl TcpConfig {
    /// Peer at `host:port` with the default connect timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For lab targets only.
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Connection timeout.
    pub timeout: Duration,

    /// Command to exec instead of an interactive shell.
    pub command: Option<String>,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Connect to `host` as `username` on port 22.
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            auth: AuthMethod::None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            command: None,
            terminal_width: 80,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Authentication method for SSH connections.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// No authentication.
    None,

    /// Password authentication.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

/// Options for a secondary terminal allocated by the bridge.
#[derive(Debug, Clone, Default)]
pub struct TtyOptions {
    /// Print the device path to stderr once allocated.
    pub verbose: bool,

    /// Put the terminal side in raw mode, so bytes cross unaltered in both
    /// directions and no escaping is needed.
    pub raw: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_defaults() {
        let config = ProcessConfig::new("./vuln");
        assert!(config.ignore_sighup);
        assert!(config.args.is_empty());
        assert_eq!(config.display_name(), "./vuln");
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(TcpConfig::new("ctf.example", 31337).socket_addr(), "ctf.example:31337");
        assert_eq!(SshConfig::new("box", "user").socket_addr(), "box:22");
    }
}
