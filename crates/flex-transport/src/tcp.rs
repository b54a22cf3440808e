//! TCP transport.
//!
//! TCP is a byte stream, so frame boundaries are recovered from the packet
//! header: read the fixed header, take the payload length out of it, then
//! read exactly that many payload bytes.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use crate::{FRAME_HEADER_SIZE, LENGTH_FIELD_OFFSET, TransportConfig};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// Frame transport over a single TCP connection.
///
/// # Examples
///
/// ```no_run
/// use flex_transport::{TcpTransport, Transport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::connect("127.0.0.1:9100").await?;
/// println!("connected to {}", transport.peer_addr());
/// # Ok(())
/// # }
/// ```
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
    closed: AtomicBool,
    stats: StatsCounters,
}

impl TcpTransport {
    /// Connect with the default [`TransportConfig`].
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if the connection cannot be made
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> TransportResult<Self> {
        Self::connect_with(addr, &TransportConfig::default()).await
    }

    /// Connect honoring `config`'s timeout and socket options.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] on refusal or timeout
    pub async fn connect_with<A: ToSocketAddrs>(
        addr: A,
        config: &TransportConfig,
    ) -> TransportResult<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionFailed("connect timed out".into()))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(config.nodelay)?;
        Self::from_stream(stream)
    }

    /// Wrap an already connected stream, e.g. one accepted by a listener.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the peer address cannot be read
    pub fn from_stream(stream: TcpStream) -> TransportResult<Self> {
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        tracing::debug!("TCP transport established with {}", peer);

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer,
            closed: AtomicBool::new(false),
            stats: StatsCounters::default(),
        })
    }

    /// Address of the remote end.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    async fn read_frame(&self) -> TransportResult<Vec<u8>> {
        let mut reader = self.reader.lock().await;

        let mut frame = vec![0u8; FRAME_HEADER_SIZE];
        reader.read_exact(&mut frame).await?;

        let len = u16::from_be_bytes([
            frame[LENGTH_FIELD_OFFSET],
            frame[LENGTH_FIELD_OFFSET + 1],
        ]) as usize;
        frame.resize(FRAME_HEADER_SIZE + len, 0);
        reader.read_exact(&mut frame[FRAME_HEADER_SIZE..]).await?;

        Ok(frame)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, frame: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if frame.len() > FRAME_HEADER_SIZE + u16::MAX as usize {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }

        let mut writer = self.writer.lock().await;
        match writer.write_all(frame).await {
            Ok(()) => {
                self.stats.record_send(frame.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(e.into())
            }
        }
    }

    async fn recv(&self) -> TransportResult<Vec<u8>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.read_frame().await {
            Ok(frame) => {
                self.stats.record_recv(frame.len());
                Ok(frame)
            }
            Err(e) if e.is_closed() => {
                self.closed.store(true, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
            Err(e) => {
                self.stats.record_recv_error();
                Err(e)
            }
        }
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Closing TCP transport to {}", self.peer);
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x06, 0, 1, 0, 2, 0, 3, 0, 4];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    async fn connected_pair() -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpTransport::connect(addr), listener.accept());
        let (server_stream, _) = accepted.unwrap();
        (client.unwrap(), TcpTransport::from_stream(server_stream).unwrap())
    }

    #[tokio::test]
    async fn test_frames_keep_boundaries() {
        let (client, server) = connected_pair().await;

        // Back-to-back writes coalesce on the wire; recv must split them again.
        client.send(&frame(b"hello")).await.unwrap();
        client.send(&frame(b"")).await.unwrap();
        client.send(&frame(&[7u8; 3000])).await.unwrap();

        assert_eq!(server.recv().await.unwrap(), frame(b"hello"));
        assert_eq!(server.recv().await.unwrap(), frame(b""));
        assert_eq!(server.recv().await.unwrap(), frame(&[7u8; 3000]));

        let stats = server.stats();
        assert_eq!(stats.frames_received, 3);
    }

    #[tokio::test]
    async fn test_peer_close_reports_closed() {
        let (client, server) = connected_pair().await;
        client.close().await.unwrap();

        let err = server.recv().await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (client, _server) = connected_pair().await;
        client.close().await.unwrap();
        assert!(matches!(
            client.send(&frame(b"x")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::connect(addr).await.err().unwrap();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }
}
