//! Target sessions: escaped sends, expectations with diagnostics, and the
//! hand-off to a human operator.
//!
//! A [`Session`] owns one [`Channel`] and is the only thing that reads from
//! it. Automated matching ([`Session::try_expect`]) and interactive
//! forwarding ([`Session::prompt`]) both take `&mut self`, so they can never
//! overlap; [`Session::control`] reports which of the two last held it.

mod builder;
mod expect;
mod interact;
mod mirror;
mod status;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::fs::File;

use crate::channel::Channel;
use crate::codec;
use crate::error::{Result, SessionError};
use crate::transport::Transport;

pub use builder::SessionBuilder;
pub use expect::{ExpectOptions, Outcome};
pub use interact::{HandOff, Operator};
pub use mirror::{CurrentProcess, Mirror};
pub use status::{TargetStatus, Termination, signal_name};

/// Default time to wait for an expected pattern.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to keep polling for an exit status after end-of-stream.
pub const DEFAULT_STATUS_GRACE: Duration = Duration::from_millis(500);

/// Session behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Default expectation timeout. `None` waits forever.
    pub timeout: Option<Duration>,

    /// Only search the last N received bytes for patterns.
    pub search_window: Option<usize>,

    /// Keep the terminal's `\n` to `\r\n` output translation. When off
    /// (the default) it is cleared once the session starts.
    pub nlcr: bool,

    /// Escape control bytes in [`Session::send`]. Needed whenever a line
    /// discipline sits between us and the target.
    ///
    /// [`SessionBuilder`] turns this off for TCP peers and for terminals
    /// in raw mode, where there is no line discipline to defeat. SSH and
    /// process sessions keep it on.
    pub escape: bool,

    /// Pause before every write, for targets that need time to change their
    /// terminal settings.
    pub delay_before_send: Duration,

    /// Mirror the target's death onto this program.
    pub exit_with_program: bool,

    /// Appended by [`Session::send_line`], unescaped.
    pub line_ending: Vec<u8>,

    /// How long the exit status may lag behind end-of-stream.
    pub status_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            search_window: None,
            nlcr: false,
            escape: true,
            delay_before_send: Duration::ZERO,
            exit_with_program: true,
            line_ending: b"\n".to_vec(),
            status_grace: DEFAULT_STATUS_GRACE,
        }
    }
}

/// Who currently drives the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// The script: sends and expectations.
    Automated,
    /// The operator, during a hand-off.
    Interactive,
}

/// One controlled target.
pub struct Session<T> {
    channel: Channel<T>,
    config: SessionConfig,
    status: TargetStatus,
    control: Control,
    operator: Option<Operator>,
    mirror: Arc<dyn Mirror>,
}

impl<T> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("status", &self.status)
            .field("control", &self.control)
            .field("operator", &self.operator.is_some())
            .finish()
    }
}

impl<T: Transport> Session<T> {
    /// Start a session over a connected transport.
    ///
    /// Mirroring targets the current process and no operator is attached;
    /// see [`with_operator`](Self::with_operator) and
    /// [`with_mirror`](Self::with_mirror).
    pub fn new(transport: T, config: SessionConfig) -> Result<Self> {
        let status = if transport.inspects_status() {
            TargetStatus::Running
        } else {
            TargetStatus::Unknown
        };

        let mut session = Self {
            channel: Channel::new(transport, config.search_window),
            config,
            status,
            control: Control::Automated,
            operator: None,
            mirror: Arc::new(CurrentProcess::new()),
        };

        if !session.config.nlcr {
            session.channel.set_nonlcr()?;
        }
        Ok(session)
    }

    /// Attach the human who takes over on hand-offs.
    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    /// Replace the process that mirrors the target's death.
    pub fn with_mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = mirror;
        self
    }

    /// Copy all traffic to `file`.
    pub fn set_logfile(&mut self, file: File) {
        self.channel.set_logfile(file);
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    /// Who drives the channel right now.
    pub fn control(&self) -> Control {
        self.control
    }

    /// Bytes received but not consumed by any match yet.
    pub fn pending(&self) -> &[u8] {
        self.channel.pending()
    }

    /// Last status seen by [`check_status`](Self::check_status).
    pub fn status(&self) -> TargetStatus {
        self.status
    }

    /// Send bytes, escaping control bytes when the session escapes.
    ///
    /// Sessions built over TCP or over a raw-mode terminal send bytes
    /// unchanged by default; see [`SessionConfig::escape`].
    pub async fn send(&mut self, raw: impl AsRef<[u8]>) -> Result<()> {
        let raw = raw.as_ref();
        let mut out = Vec::with_capacity(raw.len() * 2);
        self.frame(raw, &mut out);
        self.transmit(&out).await
    }

    /// Like [`send`](Self::send), followed by the line ending.
    ///
    /// The line ending itself is never escaped, or the terminal would take
    /// it literally and never deliver the line.
    pub async fn send_line(&mut self, raw: impl AsRef<[u8]>) -> Result<()> {
        let raw = raw.as_ref();
        let mut out = Vec::with_capacity(raw.len() * 2 + self.config.line_ending.len());
        self.frame(raw, &mut out);
        out.extend_from_slice(&self.config.line_ending);
        self.transmit(&out).await
    }

    /// Send bytes exactly as given.
    pub async fn send_raw(&mut self, data: impl AsRef<[u8]>) -> Result<()> {
        self.transmit(data.as_ref()).await
    }

    fn frame(&self, raw: &[u8], out: &mut Vec<u8>) {
        if self.config.escape {
            codec::encode_into(raw, out);
        } else {
            out.extend_from_slice(raw);
        }
    }

    async fn transmit(&mut self, data: &[u8]) -> Result<()> {
        if !self.config.delay_before_send.is_zero() {
            tokio::time::sleep(self.config.delay_before_send).await;
        }
        trace!("sending {}", codec::printable(data));
        self.channel.write(data).await
    }

    /// Check whether the target has exited or been signaled, without
    /// blocking.
    ///
    /// Safe to call any number of times, including after end-of-stream.
    /// Targets without an inspectable process stay `Unknown`.
    pub fn check_status(&mut self) -> Result<TargetStatus> {
        if !self.channel.transport().inspects_status() {
            return Ok(TargetStatus::Unknown);
        }
        self.status = self.channel.transport_mut().status()?;
        Ok(self.status)
    }

    /// Check status, giving a target that just closed its end a moment to be
    /// reaped.
    pub(crate) async fn settle_status(&mut self) -> Result<TargetStatus> {
        let deadline = tokio::time::Instant::now() + self.config.status_grace;
        loop {
            let status = self.check_status()?;
            if !status.is_running() || tokio::time::Instant::now() >= deadline {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Die the same way the target did: same signal, or same exit status.
    pub async fn terminate_self(&mut self, cause: Termination) -> Result<()> {
        match cause {
            Termination::Signaled(signal) => {
                self.say("Killing ourself with same signal.").await?;
                self.mirror.kill(signal);
            }
            Termination::Exited(code) => {
                self.say("Exiting with same status.").await?;
                self.mirror.exit(code);
            }
        }
        Ok(())
    }

    /// Report a termination cause and mirror it if asked to.
    pub(crate) async fn diagnose(&mut self, status: TargetStatus, exit_with_program: bool) -> Result<()> {
        match status.termination() {
            Some(cause) => {
                self.say(&interact::termination_report(cause)).await?;
                if exit_with_program {
                    self.terminate_self(cause).await?;
                }
            }
            None if status == TargetStatus::Unknown => self.say("Connection closed.").await?,
            None => debug!("target ended with status {:?}", status),
        }
        Ok(())
    }

    /// Write one diagnostic line to the operator, or to the log when there
    /// is nobody to read it.
    pub(crate) async fn say(&mut self, line: &str) -> Result<()> {
        match self.operator.as_mut() {
            Some(operator) => {
                debug!("{}", line);
                operator
                    .write_line(line)
                    .await
                    .map_err(SessionError::Operator)?;
            }
            None => info!("{}", line),
        }
        Ok(())
    }

    pub fn set_nlcr(&mut self) -> Result<()> {
        self.channel.set_nlcr()
    }

    pub fn set_nonlcr(&mut self) -> Result<()> {
        self.channel.set_nonlcr()
    }

    pub fn set_echo(&mut self, on: bool) -> Result<()> {
        self.channel.set_echo(on)
    }

    /// Undo the most recent terminal mode change.
    pub fn restore_mode(&mut self) -> Result<()> {
        self.channel.restore_mode()
    }

    /// Close the channel and record the final status.
    pub async fn close(&mut self) -> Result<TargetStatus> {
        if let Some(operator) = self.operator.as_mut() {
            if let Err(e) = operator.flush().await {
                debug!("operator flush on close: {}", e);
            }
        }
        self.channel.close().await?;
        self.check_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ProcessConfig, ProcessTransport, StreamTransport};
    use tokio::io::{AsyncReadExt, duplex};

    fn quiet_config() -> SessionConfig {
        SessionConfig {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_escapes_control_bytes() {
        let (ours, mut theirs) = duplex(64);
        let mut session = Session::new(StreamTransport::new(ours), quiet_config()).unwrap();

        session.send(b"\x00\x1b\x03").await.unwrap();

        let mut wire = [0u8; 6];
        theirs.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [0x16, 0x00, 0x16, 0x1b, 0x16, 0x03]);
        assert!(
            wire.chunks(2).all(|pair| pair[0] == codec::ESCAPE_MARKER),
            "every 0x1b must sit in an escape pair"
        );
        assert_eq!(codec::decode(&wire).unwrap(), vec![0x00, 0x1b, 0x03]);
    }

    #[tokio::test]
    async fn test_send_line_keeps_terminator_raw() {
        let mock = tokio_test::io::Builder::new()
            .write(b"AA\x16\x0aBB\n")
            .build();
        let mut session = Session::new(StreamTransport::new(mock), quiet_config()).unwrap();
        session.send_line(b"AA\nBB").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_escaping() {
        let mock = tokio_test::io::Builder::new().write(b"\x00\x1b").build();
        let config = SessionConfig {
            escape: false,
            ..quiet_config()
        };
        let mut session = Session::new(StreamTransport::new(mock), config).unwrap();
        session.send(b"\x00\x1b").await.unwrap();
    }

    #[tokio::test]
    async fn test_peer_status_is_unknown() {
        let (ours, _theirs) = duplex(64);
        let mut session = Session::new(StreamTransport::new(ours), quiet_config()).unwrap();
        assert_eq!(session.status(), TargetStatus::Unknown);
        assert_eq!(session.check_status().unwrap(), TargetStatus::Unknown);
    }

    #[tokio::test]
    async fn test_check_status_after_exit_is_repeatable() {
        let mut config = ProcessConfig::new("/bin/sh");
        config.args = vec!["-c".into(), "exit 4".into()];
        let transport = ProcessTransport::spawn(&config).unwrap();
        let mut session = Session::new(transport, quiet_config()).unwrap();
        assert_eq!(session.status(), TargetStatus::Running);

        while session.channel.recv_raw().await.unwrap().is_some() {}
        let status = session.settle_status().await.unwrap();
        assert_eq!(status, TargetStatus::Terminated(Termination::Exited(4)));
        assert_eq!(session.check_status().unwrap(), status);
        assert_eq!(session.close().await.unwrap(), status);
    }

    #[tokio::test]
    async fn test_terminate_self_uses_mirror() {
        use super::mirror::tests::{Mirrored, RecordingMirror};

        let (ours, _theirs) = duplex(64);
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(StreamTransport::new(ours), quiet_config())
            .unwrap()
            .with_mirror(mirror.clone());

        session.terminate_self(Termination::Exited(3)).await.unwrap();
        session
            .terminate_self(Termination::Signaled(libc::SIGSEGV))
            .await
            .unwrap();
        assert_eq!(
            mirror.calls(),
            vec![Mirrored::Exit(3), Mirrored::Kill(libc::SIGSEGV)]
        );
    }
}
