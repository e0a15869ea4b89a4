//! Channel layer: pattern matching over a transport.
//!
//! A [`Channel`] owns a transport, the bytes received but not yet consumed,
//! and the stack of terminal modes changed on the target's terminal.

mod buffer;
mod modes;
mod patterns;

use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{ChannelError, Result};
use crate::transport::Transport;

pub use buffer::PatternBuffer;
pub use modes::ModeStack;
pub use patterns::{Expectation, Found, Matcher, Pattern};

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Index of the pattern that matched, in expectation order.
    pub index: usize,

    /// Bytes received before the match.
    pub before: Vec<u8>,

    /// The matched bytes themselves.
    pub matched: Vec<u8>,
}

/// How a [`Channel::read_until`] call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One of the patterns matched.
    Matched(Match),
    /// Nothing matched before the deadline; carries the time waited.
    TimedOut(Duration),
    /// The target closed its end. Unmatched bytes stay buffered.
    Ended,
}

/// A transport with a receive buffer and terminal-mode bookkeeping.
#[derive(Debug)]
pub struct Channel<T> {
    transport: T,
    buffer: PatternBuffer,
    modes: ModeStack,
    logfile: Option<File>,
    eof: bool,
}

impl<T: Transport> Channel<T> {
    /// Wrap a transport. `search_window` limits matching to the last N
    /// buffered bytes.
    pub fn new(transport: T, search_window: Option<usize>) -> Self {
        Self {
            transport,
            buffer: PatternBuffer::new(search_window),
            modes: ModeStack::new(),
            logfile: None,
            eof: false,
        }
    }

    /// Copy all traffic in both directions to `file`.
    pub fn set_logfile(&mut self, file: File) {
        self.logfile = Some(file);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Received bytes not yet consumed by a match.
    pub fn pending(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Remove and return the unconsumed bytes.
    pub fn take_pending(&mut self) -> Vec<u8> {
        self.buffer.take()
    }

    /// Whether the target has closed its end.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    async fn log(&mut self, data: &[u8]) -> Result<()> {
        if let Some(file) = self.logfile.as_mut() {
            file.write_all(data).await.map_err(ChannelError::Io)?;
            file.flush().await.map_err(ChannelError::Io)?;
        }
        Ok(())
    }

    /// Read until one of the expectation's patterns matches, the target
    /// closes its end, or `timeout` elapses.
    ///
    /// The buffer is searched before anything is read, so bytes left over by
    /// a previous call can satisfy this one. Transport errors are returned
    /// as-is.
    pub async fn read_until(
        &mut self,
        expectation: &Expectation,
        timeout: Option<Duration>,
    ) -> Result<ReadOutcome> {
        let start = Instant::now();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        loop {
            if let Some(found) = self.buffer.search(expectation) {
                let (before, matched) = self.buffer.consume(&found);
                trace!(
                    "pattern {} matched after {} bytes",
                    found.index,
                    before.len()
                );
                return Ok(ReadOutcome::Matched(Match {
                    index: found.index,
                    before,
                    matched,
                }));
            }

            if self.eof {
                return Ok(ReadOutcome::Ended);
            }

            let chunk = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.transport.recv()).await {
                        Ok(chunk) => chunk?,
                        Err(_) => {
                            let elapsed = start.elapsed();
                            debug!("no match for {} after {:?}", expectation, elapsed);
                            return Ok(ReadOutcome::TimedOut(elapsed));
                        }
                    }
                }
                None => self.transport.recv().await?,
            };

            match chunk {
                Some(data) => {
                    trace!("received {} bytes", data.len());
                    self.log(&data).await?;
                    self.buffer.extend(&data);
                }
                None => {
                    debug!("end of stream");
                    self.eof = true;
                }
            }
        }
    }

    /// Read whatever arrives next, bypassing the buffer.
    pub async fn recv_raw(&mut self) -> Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }
        let chunk = self.transport.recv().await?;
        self.received(chunk.as_deref()).await?;
        Ok(chunk)
    }

    /// Account for a chunk read straight from the transport.
    ///
    /// Used where the read itself must stay cancel-safe (inside a
    /// `select!`), so the bookkeeping happens after the read completed.
    pub(crate) async fn received(&mut self, chunk: Option<&[u8]>) -> Result<()> {
        match chunk {
            Some(data) => self.log(data).await,
            None => {
                self.eof = true;
                Ok(())
            }
        }
    }

    /// Write bytes to the target unchanged.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.log(data).await?;
        self.transport.send(data).await
    }

    /// Apply a mode change on the target's terminal. Transports without a
    /// terminal record a no-op so restores still pair up.
    fn change_mode(
        &mut self,
        change: impl FnOnce(&mut ModeStack, BorrowedFd<'_>) -> std::result::Result<(), ChannelError>,
    ) -> Result<()> {
        match self.transport.tty_fd() {
            Some(fd) => change(&mut self.modes, fd)?,
            None => self.modes.push_noop(),
        }
        Ok(())
    }

    pub fn set_nlcr(&mut self) -> Result<()> {
        self.change_mode(|modes, fd| modes.set_nlcr(fd))
    }

    pub fn set_nonlcr(&mut self) -> Result<()> {
        self.change_mode(|modes, fd| modes.set_nonlcr(fd))
    }

    pub fn set_echo(&mut self, on: bool) -> Result<()> {
        self.change_mode(|modes, fd| modes.set_echo(fd, on))
    }

    /// Undo the most recent mode change.
    pub fn restore_mode(&mut self) -> Result<()> {
        match self.transport.tty_fd() {
            Some(fd) => self.modes.restore(fd)?,
            None => self.modes.discard()?,
        }
        Ok(())
    }

    /// Close the transport.
    pub async fn close(&mut self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use tokio::io::{AsyncWriteExt, duplex};
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_match_across_chunks() {
        let mock = Builder::new().read(b"login").read(b": \x00rest").build();
        let mut channel = Channel::new(StreamTransport::new(mock), None);

        let outcome = channel
            .read_until(&Expectation::from("n: "), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ReadOutcome::Matched(Match {
                index: 0,
                before: b"logi".to_vec(),
                matched: b"n: ".to_vec(),
            })
        );
        assert_eq!(channel.pending(), b"\x00rest");
    }

    #[tokio::test]
    async fn test_leftover_satisfies_next_call() {
        let mock = Builder::new().read(b"one\ntwo\n").build();
        let mut channel = Channel::new(StreamTransport::new(mock), None);
        let newline = Expectation::from("\n");

        channel.read_until(&newline, None).await.unwrap();
        match channel.read_until(&newline, None).await.unwrap() {
            ReadOutcome::Matched(m) => assert_eq!(m.before, b"two"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_end_of_stream_keeps_pending() {
        let mock = Builder::new().read(b"partial").build();
        let mut channel = Channel::new(StreamTransport::new(mock), None);

        let outcome = channel
            .read_until(&Expectation::from("$ "), None)
            .await
            .unwrap();
        assert_eq!(outcome, ReadOutcome::Ended);
        assert!(channel.is_eof());
        assert_eq!(channel.pending(), b"partial");
        assert!(channel.recv_raw().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeout() {
        let (ours, mut theirs) = duplex(64);
        let mut channel = Channel::new(StreamTransport::new(ours), None);
        theirs.write_all(b"noise").await.unwrap();

        let timeout = Duration::from_millis(50);
        let outcome = channel
            .read_until(&Expectation::from("never"), Some(timeout))
            .await
            .unwrap();
        match outcome {
            ReadOutcome::TimedOut(elapsed) => assert!(elapsed >= timeout),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(channel.pending(), b"noise");
    }

    #[tokio::test]
    async fn test_io_error_propagates() {
        let mock = Builder::new()
            .read_error(std::io::Error::other("boom"))
            .build();
        let mut channel = Channel::new(StreamTransport::new(mock), None);

        let err = channel
            .read_until(&Expectation::from("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Channel(ChannelError::Io(_))));
    }

    #[tokio::test]
    async fn test_logfile_copies_traffic() {
        let path = std::env::temp_dir().join(format!("ferrotty-log-{}", std::process::id()));
        let mock = Builder::new().write(b"hi\n").read(b"ok\n").build();
        let mut channel = Channel::new(StreamTransport::new(mock), None);
        channel.set_logfile(File::create(&path).await.unwrap());

        channel.write(b"hi\n").await.unwrap();
        channel
            .read_until(&Expectation::from("ok"), None)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hi\nok\n");
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_modes_without_terminal_pair_up() {
        let (ours, _theirs) = duplex(64);
        let mut channel = Channel::new(StreamTransport::new(ours), None);

        channel.set_nonlcr().unwrap();
        channel.set_echo(true).unwrap();
        channel.restore_mode().unwrap();
        channel.restore_mode().unwrap();
        assert!(matches!(
            channel.restore_mode().unwrap_err(),
            crate::Error::Channel(ChannelError::NoSavedMode)
        ));
    }
}
