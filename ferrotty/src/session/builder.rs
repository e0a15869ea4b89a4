//! Builder for sessions over any supported transport.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use secrecy::SecretString;

use super::{Mirror, Operator, Session, SessionConfig};
use crate::bridge::TtyBridge;
use crate::error::{Result, SessionError, TransportError};
use crate::transport::{
    AnyTransport, AuthMethod, HostKeyVerification, ProcessConfig, ProcessTransport, SshConfig,
    SshTransport, StreamTransport, TcpConfig, TtyOptions,
};

/// Where the session's bytes come from.
#[derive(Debug, Clone)]
enum Origin {
    Process(ProcessConfig),
    Tcp(TcpConfig),
    Ssh(SshConfig),
    Tty(TtyOptions),
}

impl Origin {
    fn name(&self) -> &'static str {
        match self {
            Self::Process(_) => "process",
            Self::Tcp(_) => "tcp",
            Self::Ssh(_) => "ssh",
            Self::Tty(_) => "tty",
        }
    }
}

/// Builder for constructing sessions.
///
/// # Example
///
/// ```rust,no_run
/// use ferrotty::{Outcome, SessionBuilder};
///
/// # async fn example() -> Result<(), ferrotty::Error> {
/// let mut session = SessionBuilder::process("./vuln")
///     .arg("--verbose")
///     .timeout(std::time::Duration::from_secs(5))
///     .build()
///     .await?;
///
/// session.try_expect("name? ").await?;
/// session.send_line(b"AAAA\x00\xef\xbe\xad\xde").await?;
/// if let Outcome::Matched(_) = session.try_expect("$ ").await? {
///     session.pwned().await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    origin: Origin,
    config: SessionConfig,
    escape: Option<bool>,
    logfile: Option<PathBuf>,
    operator: Option<Operator>,
    mirror: Option<Arc<dyn Mirror>>,
    misuse: Vec<String>,
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Credentials are SecretStrings, which print redacted.
        f.debug_struct("SessionBuilder")
            .field("origin", &self.origin)
            .field("config", &self.config)
            .field("escape", &self.escape)
            .field("logfile", &self.logfile)
            .field("operator", &self.operator.is_some())
            .field("mirror", &self.mirror.is_some())
            .field("misuse", &self.misuse)
            .finish()
    }
}

impl SessionBuilder {
    fn with_origin(origin: Origin) -> Self {
        Self {
            origin,
            config: SessionConfig::default(),
            escape: None,
            logfile: None,
            operator: None,
            mirror: None,
            misuse: Vec::new(),
        }
    }

    /// Run `program` on a fresh pseudo-terminal.
    pub fn process(program: impl Into<OsString>) -> Self {
        Self::with_origin(Origin::Process(ProcessConfig::new(program)))
    }

    /// Connect to a TCP peer.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::with_origin(Origin::Tcp(TcpConfig::new(host, port)))
    }

    /// Open an SSH session as `username`.
    pub fn ssh(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self::with_origin(Origin::Ssh(SshConfig::new(host, username)))
    }

    /// Allocate a secondary terminal for an external program.
    pub fn tty() -> Self {
        Self::with_origin(Origin::Tty(TtyOptions::default()))
    }

    fn misuse(&mut self, option: &str) {
        self.misuse
            .push(format!("{} does not apply to a {} target", option, self.origin.name()));
    }

    /// Add an argument for the program.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        match &mut self.origin {
            Origin::Process(p) => p.args.push(arg.into()),
            _ => self.misuse("arg"),
        }
        self
    }

    /// Add arguments for the program.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        match &mut self.origin {
            Origin::Process(p) => p.args.extend(args.into_iter().map(Into::into)),
            _ => self.misuse("args"),
        }
        self
    }

    /// Working directory for the program.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        match &mut self.origin {
            Origin::Process(p) => p.cwd = Some(cwd.into()),
            _ => self.misuse("cwd"),
        }
        self
    }

    /// Replace the program's environment.
    pub fn env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        match &mut self.origin {
            Origin::Process(p) => {
                p.env = Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
            }
            _ => self.misuse("env"),
        }
        self
    }

    /// Whether the program ignores SIGHUP (default: true).
    pub fn ignore_sighup(mut self, ignore: bool) -> Self {
        match &mut self.origin {
            Origin::Process(p) => p.ignore_sighup = ignore,
            _ => self.misuse("ignore_sighup"),
        }
        self
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.port = port,
            Origin::Tcp(t) => t.port = port,
            _ => self.misuse("port"),
        }
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.auth = AuthMethod::Password(SecretString::from(password.into())),
            _ => self.misuse("password"),
        }
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => {
                s.auth = AuthMethod::PrivateKey {
                    path: key_path.into(),
                    passphrase: None,
                }
            }
            _ => self.misuse("private_key"),
        }
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => {
                s.auth = AuthMethod::PrivateKey {
                    path: key_path.into(),
                    passphrase: Some(SecretString::from(passphrase.into())),
                }
            }
            _ => self.misuse("private_key_with_passphrase"),
        }
        self
    }

    /// Run `command` instead of the login shell.
    pub fn command(mut self, command: impl Into<String>) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.command = Some(command.into()),
            _ => self.misuse("command"),
        }
        self
    }

    /// Set host key verification mode (default: `AcceptNew`).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.host_key_verification = mode,
            _ => self.misuse("host_key_verification"),
        }
        self
    }

    /// Set a custom known_hosts file path.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.known_hosts_path = Some(path.into()),
            _ => self.misuse("known_hosts_path"),
        }
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        match &mut self.origin {
            Origin::Ssh(s) => s.timeout = timeout,
            Origin::Tcp(t) => t.timeout = timeout,
            _ => self.misuse("connect_timeout"),
        }
        self
    }

    /// Print the terminal's device path to stderr once allocated.
    pub fn verbose(mut self, verbose: bool) -> Self {
        match &mut self.origin {
            Origin::Tty(t) => t.verbose = verbose,
            _ => self.misuse("verbose"),
        }
        self
    }

    /// Put the terminal in raw mode. Sends are not escaped then.
    pub fn raw(mut self, raw: bool) -> Self {
        match &mut self.origin {
            Origin::Tty(t) => t.raw = raw,
            _ => self.misuse("raw"),
        }
        self
    }

    /// Default expectation timeout. `None` waits forever.
    pub fn timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.config.timeout = timeout.into();
        self
    }

    /// Only search the last `window` bytes for patterns.
    pub fn search_window(mut self, window: Option<usize>) -> Self {
        self.config.search_window = window;
        self
    }

    /// Keep `\n` to `\r\n` translation on the target's terminal.
    pub fn nlcr(mut self, nlcr: bool) -> Self {
        self.config.nlcr = nlcr;
        self
    }

    /// Force escaping of sends on or off, whatever the transport.
    pub fn escape(mut self, escape: bool) -> Self {
        self.escape = Some(escape);
        self
    }

    pub fn delay_before_send(mut self, delay: Duration) -> Self {
        self.config.delay_before_send = delay;
        self
    }

    /// Mirror the target's death onto this program (default: true).
    pub fn exit_with_program(mut self, exit: bool) -> Self {
        self.config.exit_with_program = exit;
        self
    }

    /// Line ending for `send_line` (default: `\n`).
    pub fn line_ending(mut self, ending: impl Into<Vec<u8>>) -> Self {
        self.config.line_ending = ending.into();
        self
    }

    pub fn status_grace(mut self, grace: Duration) -> Self {
        self.config.status_grace = grace;
        self
    }

    /// Copy all traffic to this file, truncating it.
    pub fn logfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.logfile = Some(path.into());
        self
    }

    /// Hand-offs go to this operator instead of stdin/stdout.
    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Spawn, connect or allocate, and return a ready session.
    pub async fn build(self) -> Result<Session<AnyTransport>> {
        if !self.misuse.is_empty() {
            return Err(SessionError::InvalidConfig {
                message: self.misuse.join("; "),
            }
            .into());
        }

        let mut config = self.config;
        let (transport, escape): (AnyTransport, bool) = match self.origin {
            Origin::Process(p) => (ProcessTransport::spawn(&p)?.into(), true),
            Origin::Tcp(t) => (StreamTransport::connect(&t).await?.into(), false),
            Origin::Ssh(s) => (SshTransport::connect(s).await?.into(), true),
            Origin::Tty(options) => {
                let (_, handle) = TtyBridge::allocate(options.clone())?;
                (handle.into(), !options.raw)
            }
        };
        config.escape = self.escape.unwrap_or(escape);
        debug!("session config: {:?}", config);

        let mut session = Session::new(transport, config)?;
        if let Some(path) = self.logfile {
            let file = tokio::fs::File::create(&path)
                .await
                .map_err(TransportError::Io)?;
            session.set_logfile(file);
        }
        if let Some(mirror) = self.mirror {
            session = session.with_mirror(mirror);
        }
        Ok(session.with_operator(self.operator.unwrap_or_else(Operator::stdio)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Outcome, TargetStatus, Termination};
    use crate::transport::Transport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_misuse_reported_at_build() {
        let err = SessionBuilder::tcp("127.0.0.1", 1)
            .arg("-x")
            .verbose(true)
            .build()
            .await
            .unwrap_err();
        match err {
            crate::Error::Session(SessionError::InvalidConfig { message }) => {
                assert!(message.contains("arg does not apply to a tcp target"));
                assert!(message.contains("verbose does not apply to a tcp target"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let builder = SessionBuilder::ssh("example.com", "alice").password("hunter2");
        let shown = format!("{builder:?}");
        assert!(shown.contains("example.com"));
        assert!(!shown.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_process_session() {
        let (input, _keyboard) = duplex(64);
        let (output, _screen) = duplex(1024);
        let mut session = SessionBuilder::process("/bin/sh")
            .args(["-c", "read line; printf 'got %s' \"$line\"; exit 5"])
            .exit_with_program(false)
            .operator(Operator::new(input, output))
            .build()
            .await
            .unwrap();

        session.send_line(b"hello").await.unwrap();
        match session.try_expect("got hello").await.unwrap() {
            Outcome::Matched(_) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            session.try_expect("never").await.unwrap(),
            Outcome::Ended(TargetStatus::Terminated(Termination::Exited(5)))
        );
    }

    #[tokio::test]
    async fn test_tcp_session_does_not_escape() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut got = [0u8; 3];
            socket.read_exact(&mut got).await.unwrap();
            socket.write_all(b"ok").await.unwrap();
            got
        });

        let (input, _keyboard) = duplex(64);
        let (output, _screen) = duplex(1024);
        let mut session = SessionBuilder::tcp("127.0.0.1", port)
            .operator(Operator::new(input, output))
            .build()
            .await
            .unwrap();
        assert!(!session.config().escape);
        assert!(!session.transport().inspects_status());

        session.send(b"\x00\x03\n").await.unwrap();
        assert!(session.try_expect("ok").await.unwrap().matched().is_some());
        assert_eq!(server.await.unwrap(), *b"\x00\x03\n");
    }

    #[tokio::test]
    async fn test_tty_session_escapes_unless_raw() {
        let (input, _keyboard) = duplex(64);
        let (output, _screen) = duplex(1024);
        let session = SessionBuilder::tty()
            .operator(Operator::new(input, output))
            .build()
            .await
            .unwrap();
        assert!(session.config().escape);
        assert!(session.transport().tty_fd().is_some());

        let (input, _keyboard) = duplex(64);
        let (output, _screen) = duplex(1024);
        let session = SessionBuilder::tty()
            .raw(true)
            .operator(Operator::new(input, output))
            .build()
            .await
            .unwrap();
        assert!(!session.config().escape);
    }
}
