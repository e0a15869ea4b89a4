//! Pseudo-terminal allocation and an async handle on the master side.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use log::debug;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::pty::{Winsize, openpty};
use nix::sys::termios::Termios;
use nix::unistd::ttyname;
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, Interest, ReadBuf};

use crate::error::TransportError;

/// A freshly allocated pseudo-terminal.
#[derive(Debug)]
pub struct PtyPair {
    /// Controlling side, driven by us.
    pub master: PtyFd,

    /// Terminal side, left open for an external program to share.
    pub slave: File,

    /// Device path of the terminal side (e.g. `/dev/pts/7`).
    pub path: PathBuf,
}

impl PtyPair {
    /// Allocate a new pseudo-terminal pair.
    ///
    /// Fails straight away when the system is out of pseudo-terminals; the
    /// call is never retried.
    pub fn open() -> Result<Self, TransportError> {
        let pty = openpty(None::<&Winsize>, None::<&Termios>)
            .map_err(|e| TransportError::PtyAllocation(e.into()))?;
        let path = ttyname(&pty.slave).map_err(|e| TransportError::PtyAllocation(e.into()))?;
        let master = PtyFd::new(pty.master).map_err(TransportError::PtyAllocation)?;

        debug!("allocated pseudo-terminal {}", path.display());
        Ok(Self {
            master,
            slave: File::from(pty.slave),
            path,
        })
    }

    /// Device path of the terminal side.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Non-blocking async reader/writer over a pseudo-terminal master.
///
/// Once every handle on the terminal side is closed, Linux reports `EIO`
/// on reads from the master; that is surfaced as end-of-stream.
#[derive(Debug)]
pub struct PtyFd {
    inner: AsyncFd<File>,
}

impl PtyFd {
    /// Wrap an owned master descriptor, switching it to non-blocking mode.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).map_err(io::Error::from)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;

        Ok(Self {
            inner: AsyncFd::with_interest(File::from(fd), Interest::READABLE | Interest::WRITABLE)?,
        })
    }
}

impl AsFd for PtyFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.get_ref().as_fd()
    }
}

impl AsyncRead for PtyFd {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => {
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for PtyFd {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
