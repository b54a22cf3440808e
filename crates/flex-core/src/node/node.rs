//! Node implementation - the application-facing handle
//!
//! A [`Node`] is cheap to clone; every clone talks to the same node task.
//! The task stops when [`Node::disconnect`] is called, when the last clone
//! is dropped, or when the transport goes away.

use super::config::NodeConfig;
use super::driver::{NodeDriver, keepalive_loop, read_loop, write_loop};
use super::event::Event;
use super::session;
use super::{NodeState, NodeStats};
use crate::error::{Error, Result};
use crate::mux::{DialTarget, Listener};
use crate::outbox::Outbox;
use crate::packet::{Address, MAX_PAYLOAD_SIZE, Packet};
use crate::secret::{SecretListener, SecretStream};
use crate::stream::{Stream, StreamContext};
use flex_transport::{TcpTransport, Transport, WsTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub(crate) struct NodeInner {
    domain: String,
    ip: u16,
    config: NodeConfig,
    events: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<NodeState>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Disconnect);
    }
}

/// flex overlay node
///
/// Connects to a relay, registers a domain, and multiplexes streams and
/// pings over that single connection.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("domain", &self.inner.domain)
            .field("ip", &self.inner.ip)
            .field("state", &self.state())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Constructors
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Connect to the relay at `endpoint` and log in.
    ///
    /// `ws://` and `wss://` URLs connect over WebSocket. Anything else is a
    /// `host:port` reached over TCP.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the relay is unreachable, or
    /// the session handshake is rejected or times out.
    pub async fn connect(endpoint: &str, credential: &str, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(NodeState::Connecting);
        tracing::info!("connecting to relay at {}", endpoint);

        let transport: Arc<dyn Transport> = if is_websocket_url(endpoint) {
            Arc::new(WsTransport::connect_with(endpoint, &config.transport).await?)
        } else {
            Arc::new(TcpTransport::connect_with(endpoint, &config.transport).await?)
        };
        Self::establish(transport, credential, config, state).await
    }

    /// Log in over an already open transport.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the session handshake is
    /// rejected or times out. The transport is closed on failure.
    pub async fn connect_with(
        transport: Arc<dyn Transport>,
        credential: &str,
        config: NodeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(NodeState::Connecting);
        Self::establish(transport, credential, config, state).await
    }

    async fn establish(
        transport: Arc<dyn Transport>,
        credential: &str,
        config: NodeConfig,
        state: watch::Sender<NodeState>,
    ) -> Result<Self> {
        let domain = if config.domain.is_empty() {
            format!("node-{}", flex_crypto::random::random_hex(4)?)
        } else {
            config.domain.clone()
        };

        state.send_replace(NodeState::Handshaking);
        let ip = match session::perform(transport.as_ref(), &domain, credential, config.session_timeout)
            .await
        {
            Ok(ip) => ip,
            Err(e) => {
                state.send_replace(NodeState::Disconnected);
                let _ = transport.close().await;
                return Err(e);
            }
        };
        tracing::info!("session established: {} is ip {}", domain, ip);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out, packets) = Outbox::new();
        let ctx = StreamContext {
            events: events_tx.clone(),
            local_domain: domain.clone(),
            window: config.window,
        };

        let state_rx = state.subscribe();
        let mut driver = NodeDriver::new(ip, ctx, &config, out, events_rx, Arc::clone(&transport), state);

        let reader = tokio::spawn(read_loop(Arc::clone(&transport), events_tx.clone()));
        let writer = tokio::spawn(write_loop(transport, packets, events_tx.clone()));
        driver.attach_task(reader.abort_handle());
        driver.attach_task(writer.abort_handle());
        if config.keepalive.enabled {
            let keepalive = tokio::spawn(keepalive_loop(events_tx.clone(), config.keepalive.clone()));
            driver.attach_task(keepalive.abort_handle());
        }

        driver.set_ready();
        tokio::spawn(driver.run());

        Ok(Self {
            inner: Arc::new(NodeInner {
                domain,
                ip,
                config,
                events: events_tx,
                state: state_rx,
            }),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Domain registered with the relay
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.inner.domain
    }

    /// Assigned logical IP, or `None` once disconnected
    #[must_use]
    pub fn ip(&self) -> Option<u16> {
        (self.state() == NodeState::Ready).then_some(self.inner.ip)
    }

    /// Node configuration
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> NodeState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle changes.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<NodeState> {
        self.inner.state.clone()
    }

    /// Whether the node is ready for streams and pings
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == NodeState::Ready
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            NodeState::Ready => Ok(()),
            NodeState::Disconnected => Err(Error::Disconnected),
            NodeState::Connecting | NodeState::Handshaking => Err(Error::NotReady),
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<Result<T>>) -> Event) -> Result<T> {
        self.ensure_ready()?;
        let (reply, rx) = oneshot::channel();
        self.inner
            .events
            .send(make(reply))
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)?
    }

    /// Counters snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Disconnected`] once the node task has stopped.
    pub async fn stats(&self) -> Result<NodeStats> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .events
            .send(Event::Stats { reply })
            .map_err(|_| Error::Disconnected)?;
        rx.await.map_err(|_| Error::Disconnected)
    }

    /// Stop the node: streams end, listeners close, pending requests fail
    /// with [`Error::Disconnected`], and the transport is closed.
    pub async fn disconnect(&self) {
        let _ = self.inner.events.send(Event::Disconnect);
        self.closed().await;
    }

    /// Wait until the node is disconnected.
    pub async fn closed(&self) {
        let mut state = self.watch_state();
        // Sender dropped means the node task is gone.
        let _ = state.wait_for(|s| *s == NodeState::Disconnected).await;
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Streams
// ═══════════════════════════════════════════════════════════════════════════

impl Node {
    /// Open a stream to `port` on the node registered as `domain`.
    ///
    /// # Errors
    ///
    /// - [`Error::DialTimeout`] if no ack arrives within the dial timeout
    /// - [`Error::ConnectionRefused`] with the remote error text
    /// - [`Error::PortsExhausted`] if no ephemeral port is free
    pub async fn dial(&self, domain: &str, port: u16) -> Result<Stream> {
        self.dial_target(DialTarget::Domain {
            domain: domain.to_owned(),
            port,
        })
        .await
    }

    /// Open a stream straight to a logical address, bypassing domain lookup.
    ///
    /// # Errors
    ///
    /// Same as [`dial`](Self::dial).
    pub async fn dial_addr(&self, addr: Address) -> Result<Stream> {
        self.dial_target(DialTarget::Addr(addr)).await
    }

    /// Open a stream to `target`.
    ///
    /// # Errors
    ///
    /// Same as [`dial`](Self::dial).
    pub async fn dial_target(&self, target: DialTarget) -> Result<Stream> {
        if let DialTarget::Domain { domain, .. } = &target {
            if domain.len() > MAX_PAYLOAD_SIZE {
                return Err(crate::error::FrameError::PayloadOverflow(domain.len()).into());
            }
        }
        self.request(|reply| Event::Dial { target, reply }).await
    }

    /// Dial and run the secret tunnel handshake on the new stream.
    ///
    /// # Errors
    ///
    /// Dial errors, or [`Error::InvalidHandshake`] / [`Error::HandshakeTimeout`].
    pub async fn dial_secret(&self, domain: &str, port: u16, secret: &[u8]) -> Result<SecretStream> {
        let stream = self.dial(domain, port).await?;
        SecretStream::handshake_with_timeout(stream, secret, self.inner.config.secret_handshake_timeout)
            .await
    }

    /// Accept streams on `port`.
    ///
    /// # Errors
    ///
    /// [`Error::PortAlreadyInUse`] or [`Error::OutOfRangePort`].
    pub async fn listen(&self, port: u16) -> Result<Listener> {
        let (accept, incoming) = mpsc::unbounded_channel();
        self.request(|reply| Event::Listen {
            port,
            accept,
            reply,
        })
        .await?;
        Ok(Listener::new(port, incoming, self.inner.events.clone()))
    }

    /// Accept streams on `port`, handing each to `on_accept`.
    ///
    /// Aborting the returned task unbinds the port.
    ///
    /// # Errors
    ///
    /// Same as [`listen`](Self::listen).
    pub async fn listen_with<F>(&self, port: u16, mut on_accept: F) -> Result<JoinHandle<()>>
    where
        F: FnMut(Stream) + Send + 'static,
    {
        let mut listener = self.listen(port).await?;
        Ok(tokio::spawn(async move {
            while let Some(stream) = listener.accept().await {
                on_accept(stream);
            }
        }))
    }

    /// Accept secret tunnels on `port`.
    ///
    /// # Errors
    ///
    /// Same as [`listen`](Self::listen).
    pub async fn listen_secret(&self, port: u16, secret: &[u8]) -> Result<SecretListener> {
        let listener = self.listen(port).await?;
        Ok(SecretListener::new(
            listener,
            secret.to_vec(),
            self.inner.config.secret_handshake_timeout,
        ))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Ping & raw packets
    // ═══════════════════════════════════════════════════════════════════════

    /// Measure the round trip to the node registered as `domain`.
    ///
    /// # Errors
    ///
    /// [`Error::PingTimeout`], or [`Error::PingRejected`] with the remote error text.
    pub async fn ping(&self, domain: &str, timeout: Duration) -> Result<Duration> {
        self.request(|reply| Event::Ping {
            domain: domain.to_owned(),
            timeout,
            reply,
        })
        .await
    }

    /// Queue an arbitrary packet for the transport.
    ///
    /// # Errors
    ///
    /// [`Error::Frame`] if the payload is too large to encode.
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.request(|reply| Event::Send { packet, reply }).await
    }
}

fn is_websocket_url(endpoint: &str) -> bool {
    let lower = endpoint.to_ascii_lowercase();
    lower.starts_with("ws://") || lower.starts_with("wss://")
}
