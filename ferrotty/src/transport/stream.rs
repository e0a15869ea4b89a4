//! Transport over any async byte stream (TCP sockets, in-memory pipes).

use bytes::{Bytes, BytesMut};
use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::Transport;
use super::config::TcpConfig;
use crate::error::{ChannelError, Result, TransportError};

/// Default read chunk size.
pub(crate) const READ_CHUNK: usize = 4096;

/// A transport over a plain byte stream.
///
/// There is no process behind the stream as far as we can tell, so status
/// inspection does not apply.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    read_buf: BytesMut,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Get a reference to the wrapped stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl StreamTransport<TcpStream> {
    /// Connect to a network peer.
    pub async fn connect(config: &TcpConfig) -> Result<Self> {
        let stream = tokio::time::timeout(
            config.timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|source| TransportError::ConnectionFailed {
            host: config.host.clone(),
            port: config.port,
            source,
        })?;

        stream.set_nodelay(true).map_err(TransportError::Io)?;
        debug!("connected to {}", config.socket_addr());
        Ok(Self::new(stream))
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        self.read_buf.reserve(READ_CHUNK);
        let n = match self.stream.read_buf(&mut self.read_buf).await {
            Ok(n) => n,
            // A pty master reads EIO once every terminal-side fd is closed.
            Err(e) if e.raw_os_error() == Some(libc::EIO) => 0,
            Err(e) => return Err(ChannelError::Io(e).into()),
        };
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_buf.split().freeze()))
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(ChannelError::Io)?;
        self.stream.flush().await.map_err(ChannelError::Io)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // A peer that already went away is not an error at close time.
        if let Err(e) = self.stream.shutdown().await {
            debug!("shutdown after close: {}", e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_recv_and_end_of_stream() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\x00\x01binary")
            .build();
        let mut transport = StreamTransport::new(mock);

        assert_eq!(
            transport.recv().await.unwrap().as_deref(),
            Some(&b"\x00\x01binary"[..])
        );
        assert!(transport.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_writes_verbatim() {
        let mock = tokio_test::io::Builder::new().write(b"\x03\x04").build();
        let mut transport = StreamTransport::new(mock);
        transport.send(b"\x03\x04").await.unwrap();
    }

    #[tokio::test]
    async fn test_status_not_applicable() {
        let (a, _b) = duplex(64);
        let mut transport = StreamTransport::new(a);
        assert!(!transport.inspects_status());
        assert_eq!(
            transport.status().unwrap(),
            crate::session::TargetStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TcpConfig::new("127.0.0.1", port);
        let err = StreamTransport::connect(&config).await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::ConnectionFailed { .. })
        ));
    }
}
