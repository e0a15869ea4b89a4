//! Secondary terminals for external programs.
//!
//! [`TtyBridge::allocate`] creates a pseudo-terminal whose device path can be
//! handed to another program (`gdb --tty`, `socat`, a second shell) and
//! returns a [`TtyHandle`] that works like any other transport. A spawned
//! task copies bytes between the terminal and the handle, in order, until
//! either side closes.

use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use log::debug;
use nix::sys::termios::{SetArg, cfmakeraw, tcgetattr, tcsetattr};
use tokio::io::{DuplexStream, duplex};
use tokio::task::JoinHandle;

use crate::error::{Result, TransportError};
use crate::transport::{PtyFd, PtyPair, READ_CHUNK, StreamTransport, Transport, TtyOptions};

/// Bytes buffered in each direction between the terminal and the handle.
const BRIDGE_BUFFER: usize = 4 * READ_CHUNK;

/// How long [`TtyHandle::close`] waits for the forwarding task.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Allocator for secondary terminals.
#[derive(Debug, Clone, Copy)]
pub struct TtyBridge;

impl TtyBridge {
    /// Allocate a terminal and start forwarding.
    ///
    /// Running out of pseudo-terminals is reported straight away.
    pub fn allocate(options: TtyOptions) -> Result<(PathBuf, TtyHandle)> {
        let PtyPair {
            master, slave, path,
        } = PtyPair::open()?;

        if options.raw {
            let mut mode =
                tcgetattr(slave.as_fd()).map_err(|e| TransportError::PtyAllocation(e.into()))?;
            cfmakeraw(&mut mode);
            tcsetattr(slave.as_fd(), SetArg::TCSANOW, &mode)
                .map_err(|e| TransportError::PtyAllocation(e.into()))?;
        }

        if options.verbose {
            eprint!("New tty spawned at {}\r\n", path.display());
        } else {
            debug!("new tty at {}", path.display());
        }

        let (proxy, far_end) = duplex(BRIDGE_BUFFER);
        let forwarder = tokio::spawn(forward(master, far_end));

        let handle = TtyHandle {
            io: StreamTransport::new(proxy),
            slave,
            path: path.clone(),
            forwarder: Some(forwarder),
        };
        Ok((path, handle))
    }
}

/// Copy both directions until one side closes, then drop everything.
async fn forward(master: PtyFd, proxy: DuplexStream) {
    let (mut master_rd, mut master_wr) = tokio::io::split(master);
    let (mut proxy_rd, mut proxy_wr) = tokio::io::split(proxy);

    tokio::select! {
        copied = tokio::io::copy(&mut master_rd, &mut proxy_wr) => {
            debug!("tty side closed: {:?}", copied);
        }
        copied = tokio::io::copy(&mut proxy_rd, &mut master_wr) => {
            debug!("proxy side closed: {:?}", copied);
        }
    }
}

/// The script's end of a secondary terminal.
///
/// Keeps the terminal side open itself, so the external program can come
/// and go without the bridge seeing a hang-up.
#[derive(Debug)]
pub struct TtyHandle {
    io: StreamTransport<DuplexStream>,
    slave: File,
    path: PathBuf,
    forwarder: Option<JoinHandle<()>>,
}

impl TtyHandle {
    /// Device path for the external program.
    pub fn ttyname(&self) -> &Path {
        &self.path
    }
}

impl Transport for TtyHandle {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.io.recv().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.io.send(data).await
    }

    fn tty_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.slave.as_fd())
    }

    async fn close(&mut self) -> Result<()> {
        self.io.close().await?;
        if let Some(forwarder) = self.forwarder.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, forwarder).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("tty forwarder failed: {}", e),
                Err(_) => debug!("tty forwarder still running after {:?}", CLOSE_TIMEOUT),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::{Read, Write};
    use std::os::unix::fs::OpenOptionsExt;

    fn open_device(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .unwrap()
    }

    #[tokio::test]
    async fn test_allocate_gives_device() {
        let (path, handle) = TtyBridge::allocate(TtyOptions::default()).unwrap();
        assert!(path.exists());
        assert_eq!(handle.ttyname(), path.as_path());
        assert!(handle.tty_fd().is_some());
        assert!(!handle.inspects_status());
    }

    #[tokio::test]
    async fn test_raw_bytes_cross_unaltered_both_ways() {
        let options = TtyOptions {
            raw: true,
            ..Default::default()
        };
        let (path, mut handle) = TtyBridge::allocate(options).unwrap();
        let payload: Vec<u8> = (0..=u8::MAX).collect();

        let mut device = open_device(&path);
        handle.send(&payload).await.unwrap();
        let expected = payload.clone();
        let mut device = tokio::task::spawn_blocking(move || {
            let mut got = vec![0u8; expected.len()];
            device.read_exact(&mut got).unwrap();
            assert_eq!(got, expected);
            device
        })
        .await
        .unwrap();

        device.write_all(&payload).unwrap();
        let mut got = Vec::new();
        while got.len() < payload.len() {
            let chunk = handle.recv().await.unwrap().expect("bridge closed early");
            got.extend_from_slice(&chunk);
        }
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn test_closing_handle_hangs_up_device() {
        let (path, mut handle) = TtyBridge::allocate(TtyOptions {
            raw: true,
            ..Default::default()
        })
        .unwrap();
        let mut device = open_device(&path);

        handle.close().await.unwrap();
        drop(handle);

        let n = tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 16];
            device.read(&mut buf).unwrap_or(0)
        })
        .await
        .unwrap();
        assert_eq!(n, 0);
    }
}
