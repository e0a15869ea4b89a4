//! Expectations with diagnostics.

use std::time::Duration;

use log::{debug, info, warn};

use super::{HandOff, Session, TargetStatus};
use crate::channel::{Expectation, Match, ReadOutcome};
use crate::error::Result;
use crate::transport::Transport;

/// Per-call overrides for [`Session::try_expect_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectOptions {
    /// Wait this long instead of the session default.
    pub timeout: Option<Duration>,

    /// Override the session's `exit_with_program`.
    pub exit_with_program: Option<bool>,
}

impl ExpectOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn exit_with_program(mut self, exit: bool) -> Self {
        self.exit_with_program = Some(exit);
        self
    }
}

/// How a [`Session::try_expect`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A pattern matched.
    Matched(Match),

    /// Nothing matched in time. The operator, if any, has already had the
    /// channel.
    TimedOut { elapsed: Duration },

    /// The target closed its end. Carries what became of it.
    Ended(TargetStatus),
}

impl Outcome {
    pub fn matched(&self) -> Option<&Match> {
        match self {
            Self::Matched(m) => Some(m),
            _ => None,
        }
    }
}

impl<T: Transport> Session<T> {
    /// Wait for a pattern with the session's default timeout.
    ///
    /// No diagnostics, no hand-off, no mirroring: the outcome is returned
    /// as-is.
    pub async fn expect(&mut self, expectation: impl Into<Expectation>) -> Result<ReadOutcome> {
        let timeout = self.config.timeout;
        self.expect_timeout(expectation, timeout).await
    }

    /// Like [`expect`](Self::expect) with an explicit timeout. `None` waits
    /// forever.
    pub async fn expect_timeout(
        &mut self,
        expectation: impl Into<Expectation>,
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome> {
        let expectation = expectation.into();
        self.channel.read_until(&expectation, timeout).await
    }

    /// Wait for a pattern, turning failures into diagnostics.
    ///
    /// - On timeout the operator gets the channel, labelled with what was
    ///   expected, and the script continues once they give it back.
    /// - On end-of-stream the target's status is checked and reported, and
    ///   its death is mirrored unless `exit_with_program` is off.
    /// - Channel errors are returned unchanged.
    pub async fn try_expect(&mut self, expectation: impl Into<Expectation>) -> Result<Outcome> {
        self.try_expect_with(expectation, ExpectOptions::default())
            .await
    }

    /// [`try_expect`](Self::try_expect) with per-call options.
    pub async fn try_expect_with(
        &mut self,
        expectation: impl Into<Expectation>,
        options: ExpectOptions,
    ) -> Result<Outcome> {
        let expectation = expectation.into();
        let timeout = options.timeout.or(self.config.timeout);
        let exit_with_program = options
            .exit_with_program
            .unwrap_or(self.config.exit_with_program);

        match self.channel.read_until(&expectation, timeout).await? {
            ReadOutcome::Matched(found) => Ok(Outcome::Matched(found)),

            ReadOutcome::TimedOut(elapsed) => {
                let label = format!("Didn't receive expected {expectation} after {elapsed:.1?}.");
                warn!("{}", label);
                if self.operator.is_none() {
                    debug!("no operator to hand the channel to, continuing");
                    return Ok(Outcome::TimedOut { elapsed });
                }
                let handoff = self.interact(Some(&label)).await?;
                if let HandOff::Ended(status) = handoff {
                    self.diagnose(status, exit_with_program).await?;
                }
                self.say("Continuing script.").await?;
                Ok(Outcome::TimedOut { elapsed })
            }

            ReadOutcome::Ended => {
                let status = self.settle_status().await?;
                info!("end of stream while expecting {}", expectation);
                self.diagnose(status, exit_with_program).await?;
                Ok(Outcome::Ended(status))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::mirror::tests::{Mirrored, RecordingMirror};
    use super::super::{Operator, SessionConfig, Termination};
    use super::*;
    use crate::channel::Pattern;
    use crate::transport::{ProcessConfig, ProcessTransport, StreamTransport};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    fn operator() -> (Operator, DuplexStream, DuplexStream) {
        let (input, keyboard) = duplex(1024);
        let (output, screen) = duplex(64 * 1024);
        (Operator::new(input, output), keyboard, screen)
    }

    async fn screen_text(mut screen: DuplexStream) -> String {
        let mut out = Vec::new();
        screen.read_to_end(&mut out).await.unwrap();
        String::from_utf8_lossy(&out).into_owned()
    }

    fn sh(script: &str) -> ProcessTransport {
        let mut config = ProcessConfig::new("/bin/sh");
        config.args = vec!["-c".into(), script.into()];
        ProcessTransport::spawn(&config).unwrap()
    }

    #[tokio::test]
    async fn test_matched() {
        let mock = tokio_test::io::Builder::new()
            .read(b"Welcome\nName: ")
            .build();
        let mut session = Session::new(StreamTransport::new(mock), SessionConfig::default()).unwrap();

        let expectation =
            Expectation::new([Pattern::exact("Password: "), Pattern::regex(r"\w+: ").unwrap()])
                .unwrap();
        let outcome = session.try_expect(expectation).await.unwrap();
        let found = outcome.matched().unwrap();
        assert_eq!(found.index, 1);
        assert_eq!(found.before, b"Welcome\n");
        assert_eq!(found.matched, b"Name: ");
    }

    #[tokio::test]
    async fn test_timeout_hands_off_once() {
        let (ours, _target) = duplex(1024);
        let (operator, mut keyboard, screen) = operator();
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(StreamTransport::new(ours), SessionConfig::default())
            .unwrap()
            .with_operator(operator)
            .with_mirror(mirror.clone());

        keyboard.write_all(&[super::super::interact::DEFAULT_ESCAPE]).await.unwrap();
        let timeout = Duration::from_millis(100);
        let outcome = session
            .try_expect_with("never", ExpectOptions::default().timeout(timeout))
            .await
            .unwrap();

        match outcome {
            Outcome::TimedOut { elapsed } => assert!(elapsed >= timeout),
            other => panic!("unexpected {other:?}"),
        }
        assert!(mirror.calls().is_empty());

        drop(session);
        let text = screen_text(screen).await;
        assert_eq!(text.matches("Didn't receive expected 'never'").count(), 1);
        assert!(text.ends_with("Continuing script.\r\n"));
    }

    #[tokio::test]
    async fn test_timeout_without_operator_continues() {
        let (ours, _target) = duplex(1024);
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(StreamTransport::new(ours), SessionConfig::default())
            .unwrap()
            .with_mirror(mirror.clone());

        let timeout = Duration::from_millis(50);
        let outcome = session
            .try_expect_with("never", ExpectOptions::default().timeout(timeout))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::TimedOut { elapsed } if elapsed >= timeout));
        assert!(mirror.calls().is_empty());

        // The session stays usable afterwards.
        let outcome = session
            .try_expect_with("still never", ExpectOptions::default().timeout(timeout))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_end_of_stream_mirrors_signal() {
        let (operator, _keyboard, screen) = operator();
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(sh("kill -SEGV $$"), SessionConfig::default())
            .unwrap()
            .with_operator(operator)
            .with_mirror(mirror.clone());

        let outcome = session.try_expect("never").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Ended(TargetStatus::Terminated(Termination::Signaled(libc::SIGSEGV)))
        );
        assert_eq!(mirror.calls(), vec![Mirrored::Kill(libc::SIGSEGV)]);

        drop(session);
        let text = screen_text(screen).await;
        assert!(text.contains(&format!(
            "Program received signal {} (SIGSEGV).\r\nKilling ourself with same signal.\r\n",
            libc::SIGSEGV
        )));
    }

    #[tokio::test]
    async fn test_end_of_stream_exit_code_without_mirroring() {
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(sh("printf bye; exit 42"), SessionConfig::default())
            .unwrap()
            .with_mirror(mirror.clone());

        let outcome = session
            .try_expect_with("never", ExpectOptions::default().exit_with_program(false))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Ended(TargetStatus::Terminated(Termination::Exited(42)))
        );
        assert!(mirror.calls().is_empty());
        assert_eq!(session.pending(), b"bye");
    }

    #[tokio::test]
    async fn test_end_of_stream_exit_code_mirrored() {
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(sh("exit 42"), SessionConfig::default())
            .unwrap()
            .with_mirror(mirror.clone());

        session.try_expect("never").await.unwrap();
        assert_eq!(mirror.calls(), vec![Mirrored::Exit(42)]);
    }

    #[tokio::test]
    async fn test_peer_end_of_stream_is_unknown() {
        let mock = tokio_test::io::Builder::new().read(b"bye").build();
        let mirror = Arc::new(RecordingMirror::default());
        let mut session = Session::new(StreamTransport::new(mock), SessionConfig::default())
            .unwrap()
            .with_mirror(mirror.clone());

        let outcome = session.try_expect("never").await.unwrap();
        assert_eq!(outcome, Outcome::Ended(TargetStatus::Unknown));
        assert!(mirror.calls().is_empty());
    }
}
