//! Handing the channel over to a human and taking it back.

use std::io::{self, IsTerminal, Stdin};
use std::os::fd::AsFd;

use log::{debug, info, warn};
use nix::sys::termios::{SetArg, Termios, cfmakeraw, tcgetattr, tcsetattr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{Control, Session, TargetStatus, Termination, signal_name};
use crate::codec;
use crate::error::{Result, SessionError};
use crate::transport::{READ_CHUNK, Transport};

/// Default key that returns control to the script (`^]`, as in telnet).
pub const DEFAULT_ESCAPE: u8 = 0x1d;

const BANNER: &str = "\r
   .-----------------------------------.\r
   |  target owned, shell is yours     |\r
   |  mirroring disabled for this one  |\r
   '-----------------------------------'\r
\r
";

/// The human at the other end of a hand-off.
pub struct Operator {
    input: Box<dyn AsyncRead + Unpin + Send>,
    output: Box<dyn AsyncWrite + Unpin + Send>,
    escape: u8,
    /// Switched to raw mode while forwarding, when it is a real terminal.
    terminal: Option<Stdin>,
    /// Print the escape-character notice before forwarding.
    announce: bool,
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("escape", &self.escape)
            .field("terminal", &self.terminal.is_some())
            .field("announce", &self.announce)
            .finish()
    }
}

impl Operator {
    /// Any pair of streams, e.g. a socket or an in-memory pipe.
    pub fn new(
        input: impl AsyncRead + Unpin + Send + 'static,
        output: impl AsyncWrite + Unpin + Send + 'static,
    ) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
            escape: DEFAULT_ESCAPE,
            terminal: None,
            announce: false,
        }
    }

    /// Our own stdin and stdout.
    pub fn stdio() -> Self {
        let stdin = io::stdin();
        let terminal = stdin.is_terminal().then_some(stdin);
        Self {
            input: Box::new(tokio::io::stdin()),
            output: Box::new(tokio::io::stdout()),
            escape: DEFAULT_ESCAPE,
            terminal,
            announce: io::stdout().is_terminal(),
        }
    }

    /// Use `byte` instead of `^]` to end a hand-off.
    pub fn escape_character(mut self, byte: u8) -> Self {
        self.escape = byte;
        self
    }

    /// Print the escape-character notice before each hand-off.
    pub fn announce(mut self, announce: bool) -> Self {
        self.announce = announce;
        self
    }

    pub(crate) async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.output.write_all(line.as_bytes()).await?;
        self.output.write_all(b"\r\n").await?;
        self.output.flush().await
    }

    pub(crate) async fn write_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.output.write_all(data).await?;
        self.output.flush().await
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.output.flush().await
    }

    fn raw_mode(&self) -> io::Result<Option<RawModeGuard>> {
        let Some(stdin) = &self.terminal else {
            return Ok(None);
        };
        let saved = tcgetattr(stdin.as_fd()).map_err(io::Error::from)?;
        let mut raw = saved.clone();
        cfmakeraw(&mut raw);
        tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;
        Ok(Some(RawModeGuard {
            stdin: io::stdin(),
            saved,
        }))
    }
}

/// Puts the operator's terminal back the way it was.
struct RawModeGuard {
    stdin: Stdin,
    saved: Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = tcsetattr(self.stdin.as_fd(), SetArg::TCSADRAIN, &self.saved) {
            warn!("failed to restore operator terminal: {}", e);
        }
    }
}

/// How a hand-off ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandOff {
    /// The operator gave control back (escape character or closed input).
    Returned,
    /// The target closed its end; carries the status found afterwards.
    Ended(TargetStatus),
}

/// One-line description of how the target went away.
pub(crate) fn termination_report(cause: Termination) -> String {
    match cause {
        Termination::Signaled(signal) => {
            format!("Program received signal {} ({}).", signal, signal_name(signal))
        }
        Termination::Exited(code) => format!("Program exited with status {code}."),
    }
}

fn escape_notice(escape: u8) -> String {
    format!("Escape character is '{}'", codec::printable(&[escape]))
}

impl<T: Transport> Session<T> {
    /// Give the channel to the operator until they press the escape
    /// character or the target closes its end.
    ///
    /// Echo and `\n` translation are switched on for the human and restored
    /// afterwards. Bytes still pending from earlier expectations are shown
    /// in escaped form, then passed through. Everything forwarded during
    /// the hand-off goes through unescaped and never reaches the matcher.
    pub async fn interact(&mut self, label: Option<&str>) -> Result<HandOff> {
        let mut operator = self.operator.take().ok_or(SessionError::NoOperator)?;

        self.control = Control::Interactive;
        let result = self.hand_over(&mut operator, label).await;
        self.control = Control::Automated;
        self.operator = Some(operator);

        if result? {
            let status = self.settle_status().await?;
            Ok(HandOff::Ended(status))
        } else {
            Ok(HandOff::Returned)
        }
    }

    /// [`interact`](Self::interact), then report and mirror the target's
    /// death per the session's `exit_with_program`.
    pub async fn prompt(&mut self, label: Option<&str>) -> Result<HandOff> {
        let exit_with_program = self.config.exit_with_program;
        self.prompt_with(label, exit_with_program).await
    }

    /// Like [`prompt`](Self::prompt) with an explicit mirroring choice.
    pub async fn prompt_with(
        &mut self,
        label: Option<&str>,
        exit_with_program: bool,
    ) -> Result<HandOff> {
        let handoff = self.interact(label).await?;
        if let HandOff::Ended(status) = handoff {
            self.diagnose(status, exit_with_program).await?;
        }
        Ok(handoff)
    }

    /// Celebratory hand-off once the target is taken over. The target's
    /// death is reported but never mirrored.
    pub async fn pwned(&mut self) -> Result<HandOff> {
        if let Some(operator) = self.operator.as_mut() {
            if operator.announce {
                operator
                    .write_raw(BANNER.as_bytes())
                    .await
                    .map_err(SessionError::Operator)?;
            }
        }
        self.prompt_with(None, false).await
    }

    /// Set up terminal modes around [`forward`](Self::forward). Returns
    /// whether the channel ended.
    async fn hand_over(&mut self, operator: &mut Operator, label: Option<&str>) -> Result<bool> {
        self.channel.set_echo(true)?;
        if let Err(e) = self.channel.set_nlcr() {
            self.channel.restore_mode()?;
            return Err(e);
        }

        let outcome = self.forward(operator, label).await;

        for _ in 0..2 {
            // The target's terminal may be gone already.
            if let Err(e) = self.channel.restore_mode() {
                debug!("restoring target terminal after hand-off: {}", e);
            }
        }
        outcome
    }

    async fn forward(&mut self, operator: &mut Operator, label: Option<&str>) -> Result<bool> {
        if operator.announce {
            operator
                .write_line(&escape_notice(operator.escape))
                .await
                .map_err(SessionError::Operator)?;
        }
        if let Some(label) = label {
            info!("{}", label);
            operator
                .write_line(label)
                .await
                .map_err(SessionError::Operator)?;
        }

        let pending = self.channel.take_pending();
        if !pending.is_empty() {
            let shown = codec::printable(&codec::encode(&pending));
            operator
                .write_line(&format!("Pending: {shown}"))
                .await
                .map_err(SessionError::Operator)?;
            operator
                .write_raw(&pending)
                .await
                .map_err(SessionError::Operator)?;
        }

        let _raw = operator.raw_mode().map_err(SessionError::Operator)?;

        if self.channel.is_eof() {
            return Ok(true);
        }

        let mut typed = vec![0u8; READ_CHUNK];
        loop {
            tokio::select! {
                read = operator.input.read(&mut typed) => {
                    let n = read.map_err(SessionError::Operator)?;
                    if n == 0 {
                        debug!("operator input closed");
                        return Ok(false);
                    }
                    let typed = &typed[..n];
                    if let Some(pos) = memchr::memchr(operator.escape, typed) {
                        if pos > 0 {
                            self.channel.write(&typed[..pos]).await?;
                        }
                        debug!("operator returned control");
                        return Ok(false);
                    }
                    self.channel.write(typed).await?;
                }
                chunk = self.channel.transport_mut().recv() => {
                    let chunk = chunk?;
                    self.channel.received(chunk.as_deref()).await?;
                    match chunk {
                        Some(data) => operator
                            .write_raw(&data)
                            .await
                            .map_err(SessionError::Operator)?,
                        None => return Ok(true),
                    }
                }
            }
        }
    }
}
