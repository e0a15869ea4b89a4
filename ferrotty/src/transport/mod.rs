//! Byte transports that can sit under a session.
//!
//! A transport moves raw bytes to and from one target: a local child on a
//! pseudo-terminal, a TCP peer, an SSH channel, or a terminal handed to an
//! external program. Transports never interpret the data; escaping,
//! matching and status mirroring happen further up.

pub mod config;
mod process;
mod pty;
mod ssh;
mod stream;

use std::future::Future;
use std::os::fd::BorrowedFd;
use std::path::Path;

use bytes::Bytes;
use tokio::net::TcpStream;

use crate::bridge::TtyHandle;
use crate::error::Result;
use crate::session::TargetStatus;

pub use config::{AuthMethod, HostKeyVerification, ProcessConfig, SshConfig, TcpConfig, TtyOptions};
pub use process::ProcessTransport;
pub use pty::{PtyFd, PtyPair};
pub use ssh::SshTransport;
pub use stream::StreamTransport;
pub(crate) use stream::READ_CHUNK;

/// A bidirectional byte channel to a target.
pub trait Transport: Send {
    /// Receive the next chunk of bytes.
    ///
    /// Returns `Ok(None)` once the target has closed its end. Chunks are
    /// never empty.
    fn recv(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Write all of `data` to the target.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Non-blocking check of the target's state.
    ///
    /// Transports that cannot tell report [`TargetStatus::Unknown`].
    fn status(&mut self) -> Result<TargetStatus> {
        Ok(TargetStatus::Unknown)
    }

    /// Whether [`status`](Self::status) reports anything meaningful.
    fn inspects_status(&self) -> bool {
        false
    }

    /// Terminal whose line discipline shapes this transport's bytes, if any.
    fn tty_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }

    /// Release the target.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// The transports a [`SessionBuilder`](crate::SessionBuilder) can produce.
#[derive(Debug)]
pub enum AnyTransport {
    /// Local program on a pseudo-terminal.
    Process(ProcessTransport),
    /// Plain TCP peer.
    Tcp(StreamTransport<TcpStream>),
    /// SSH session channel.
    Ssh(SshTransport),
    /// Secondary terminal handed to an external program.
    Tty(TtyHandle),
}

impl AnyTransport {
    /// Device path of a secondary terminal, for handing to another program.
    pub fn ttyname(&self) -> Option<&Path> {
        match self {
            Self::Tty(t) => Some(t.ttyname()),
            _ => None,
        }
    }
}

impl Transport for AnyTransport {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self {
            Self::Process(t) => t.recv().await,
            Self::Tcp(t) => t.recv().await,
            Self::Ssh(t) => t.recv().await,
            Self::Tty(t) => t.recv().await,
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Process(t) => t.send(data).await,
            Self::Tcp(t) => t.send(data).await,
            Self::Ssh(t) => t.send(data).await,
            Self::Tty(t) => t.send(data).await,
        }
    }

    fn status(&mut self) -> Result<TargetStatus> {
        match self {
            Self::Process(t) => t.status(),
            Self::Tcp(t) => t.status(),
            Self::Ssh(t) => t.status(),
            Self::Tty(t) => t.status(),
        }
    }

    fn inspects_status(&self) -> bool {
        match self {
            Self::Process(t) => t.inspects_status(),
            Self::Tcp(t) => t.inspects_status(),
            Self::Ssh(t) => t.inspects_status(),
            Self::Tty(t) => t.inspects_status(),
        }
    }

    fn tty_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Self::Process(t) => t.tty_fd(),
            Self::Tcp(t) => t.tty_fd(),
            Self::Ssh(t) => t.tty_fd(),
            Self::Tty(t) => t.tty_fd(),
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Process(t) => t.close().await,
            Self::Tcp(t) => t.close().await,
            Self::Ssh(t) => t.close().await,
            Self::Tty(t) => t.close().await,
        }
    }
}

impl From<ProcessTransport> for AnyTransport {
    fn from(t: ProcessTransport) -> Self {
        Self::Process(t)
    }
}

impl From<StreamTransport<TcpStream>> for AnyTransport {
    fn from(t: StreamTransport<TcpStream>) -> Self {
        Self::Tcp(t)
    }
}

impl From<SshTransport> for AnyTransport {
    fn from(t: SshTransport) -> Self {
        Self::Ssh(t)
    }
}

impl From<TtyHandle> for AnyTransport {
    fn from(t: TtyHandle) -> Self {
        Self::Tty(t)
    }
}
