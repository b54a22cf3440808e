//! WebSocket transport.
//!
//! Each frame travels as exactly one binary message, so boundaries come for
//! free and no header parsing is needed. Text messages are a protocol error.
//! Ping and pong control messages are answered by the WebSocket layer and
//! never surface as frames.

use crate::transport::{StatsCounters, Transport, TransportError, TransportResult, TransportStats};
use crate::{FRAME_HEADER_SIZE, TransportConfig};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Frame transport over one WebSocket connection.
///
/// # Examples
///
/// ```no_run
/// use flex_transport::{Transport, WsTransport};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = WsTransport::connect("ws://127.0.0.1:8080/flex/ws").await?;
/// transport.send(&[0u8; 11]).await?;
/// # Ok(())
/// # }
/// ```
pub struct WsTransport<S = MaybeTlsStream<TcpStream>> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    closed: AtomicBool,
    stats: StatsCounters,
}

impl WsTransport {
    /// Connect to `url` with the default [`TransportConfig`].
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if the upgrade fails
    pub async fn connect(url: &str) -> TransportResult<Self> {
        Self::connect_with(url, &TransportConfig::default()).await
    }

    /// Connect to `url`, giving up after `config.connect_timeout`.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] on refusal, a bad URL,
    /// a rejected upgrade or timeout
    pub async fn connect_with(url: &str, config: &TransportConfig) -> TransportResult<Self> {
        let (ws, _response) =
            tokio::time::timeout(config.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| TransportError::ConnectionFailed("connect timed out".into()))?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if let MaybeTlsStream::Plain(tcp) = ws.get_ref() {
            tcp.set_nodelay(config.nodelay)?;
        }
        tracing::debug!("WebSocket transport established with {}", url);
        Ok(Self::from_stream(ws))
    }
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Run the server side of the upgrade on an accepted connection.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionFailed`] if the client's upgrade
    /// request is invalid
    pub async fn accept(stream: S) -> TransportResult<Self> {
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self::from_stream(ws))
    }

    /// Wrap an upgraded WebSocket.
    pub fn from_stream(ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    async fn next_frame(&self) -> TransportResult<Vec<u8>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(frame))) => return Ok(frame),
                Some(Ok(Message::Text(_))) => {
                    return Err(TransportError::Other("text message on a frame transport".into()));
                }
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(map_error(e)),
            }
        }
    }
}

fn map_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(e) => TransportError::Io(e),
        e => TransportError::Other(e.to_string()),
    }
}

#[async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: &[u8]) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if frame.len() > FRAME_HEADER_SIZE + u16::MAX as usize {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }

        let mut sink = self.sink.lock().await;
        match sink.send(Message::Binary(frame.to_vec())).await {
            Ok(()) => {
                self.stats.record_send(frame.len());
                Ok(())
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(map_error(e))
            }
        }
    }

    async fn recv(&self) -> TransportResult<Vec<u8>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match self.next_frame().await {
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
        tracing::debug!("Closing WebSocket transport");
        match self.sink.lock().await.close().await {
            Ok(()) => Ok(()),
            Err(e) => match map_error(e) {
                TransportError::Closed => Ok(()),
                e => Err(e),
            },
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn stats(&self) -> TransportStats {
        self.stats.snapshot()
    }
}
