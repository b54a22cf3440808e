//! In-memory relay fixture for multi-node testing
//!
//! Plays the relay's side of the protocol over [`MemoryTransport`] pairs,
//! or over real WebSocket connections from [`TestRelay::listen_ws`]:
//! - Session login with credential check and IP assignment
//! - Domain resolution for open-stream and ping frames
//! - Forwarding by logical IP, in arrival order per node
//!
//! # Example
//!
//! ```no_run
//! use flex_integration_tests::fixtures::TestRelay;
//!
//! #[tokio::test]
//! async fn test_dial() {
//!     let relay = TestRelay::new();
//!     let alpha = relay.join("alpha").await.unwrap();
//!     let beta = relay.join("beta").await.unwrap();
//!
//!     let mut listener = beta.listen(80).await.unwrap();
//!     let stream = alpha.dial("beta", 80).await.unwrap();
//!     // ... exchange data ...
//! }
//! ```

use flex_core::node::{SessionRequest, SessionResponse};
use flex_core::packet::{Address, Cmd, Packet, SWITCHER_IP};
use flex_core::{KeepaliveConfig, Node, NodeConfig, Result};
use flex_transport::{MemoryTransport, Transport, WsTransport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// Credential the relay accepts unless told otherwise
pub const CREDENTIAL: &str = "relay-password";

/// Ack error text for domains nobody registered
pub const ERR_RESOLVE_DOMAIN: &str = "resolve domain failed";

/// First logical IP handed out
const FIRST_IP: u16 = 1;

struct Registry {
    credential: String,
    next_ip: u16,
    by_domain: HashMap<String, u16>,
    links: HashMap<u16, Arc<dyn Transport>>,
    blackholed: HashSet<u16>,
}

/// Relay shared by the nodes of one test
#[derive(Clone)]
pub struct TestRelay {
    registry: Arc<Mutex<Registry>>,
}

impl Default for TestRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRelay {
    /// Relay accepting [`CREDENTIAL`]
    pub fn new() -> Self {
        Self::with_credential(CREDENTIAL)
    }

    /// Relay accepting `credential`
    pub fn with_credential(credential: &str) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                credential: credential.to_owned(),
                next_ip: FIRST_IP,
                by_domain: HashMap::new(),
                links: HashMap::new(),
                blackholed: HashSet::new(),
            })),
        }
    }

    /// Node config used by [`TestRelay::join`]: keep-alive off so tests
    /// only see the frames they cause.
    pub fn config(domain: &str) -> NodeConfig {
        NodeConfig::default()
            .with_domain(domain)
            .with_keepalive(KeepaliveConfig::disabled())
    }

    /// Log a node in as `domain` with the right credential.
    pub async fn join(&self, domain: &str) -> Result<Node> {
        let credential = self.lock().credential.clone();
        self.join_with(Self::config(domain), &credential).await
    }

    /// Log a node in with an explicit config and credential.
    pub async fn join_with(&self, config: NodeConfig, credential: &str) -> Result<Node> {
        let (node_side, relay_side) = MemoryTransport::pair();
        tokio::spawn(serve(Arc::clone(&self.registry), Arc::new(relay_side)));
        Node::connect_with(Arc::new(node_side), credential, config).await
    }

    /// Accept WebSocket clients on a loopback port. Returns the URL to
    /// hand to [`Node::connect`].
    pub async fn listen_ws(&self) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/flex/ws", listener.local_addr()?);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    match WsTransport::accept(stream).await {
                        Ok(link) => serve(registry, Arc::new(link)).await,
                        Err(e) => tracing::debug!("relay: websocket upgrade failed: {}", e),
                    }
                });
            }
        });
        Ok(url)
    }

    /// Logical IP registered for `domain`
    pub fn lookup(&self, domain: &str) -> Option<u16> {
        self.lock().by_domain.get(domain).copied()
    }

    /// Silently drop every frame routed to `domain` from now on.
    pub fn blackhole(&self, domain: &str) {
        let mut registry = self.lock();
        if let Some(ip) = registry.by_domain.get(domain).copied() {
            registry.blackholed.insert(ip);
        }
    }

    /// Drop the relay's connection to `domain`. Returns false if unknown.
    pub async fn kick(&self, domain: &str) -> bool {
        let link = {
            let registry = self.lock();
            registry
                .by_domain
                .get(domain)
                .and_then(|ip| registry.links.get(ip))
                .cloned()
        };
        match link {
            Some(link) => {
                let _ = link.close().await;
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().expect("relay registry poisoned")
    }
}

// ============================================================================
// Per-node service
// ============================================================================

async fn serve(registry: Arc<Mutex<Registry>>, link: Arc<dyn Transport>) {
    let Some((ip, domain)) = login(&registry, &link).await else {
        let _ = link.close().await;
        return;
    };
    tracing::debug!("relay: {} logged in as ip {}", domain, ip);

    while let Ok(bytes) = link.recv().await {
        let Ok(mut packet) = Packet::decode(&bytes) else {
            tracing::debug!("relay: undecodable frame from {}", domain);
            continue;
        };
        packet.src.ip = ip;
        route(&registry, &link, &domain, packet).await;
    }

    let mut registry = registry.lock().expect("relay registry poisoned");
    registry.links.remove(&ip);
    registry.blackholed.remove(&ip);
    if registry.by_domain.get(&domain) == Some(&ip) {
        registry.by_domain.remove(&domain);
    }
    tracing::debug!("relay: {} left", domain);
}

async fn login(registry: &Arc<Mutex<Registry>>, link: &Arc<dyn Transport>) -> Option<(u16, String)> {
    let bytes = link.recv().await.ok()?;
    let packet = Packet::decode(&bytes).ok()?;
    if packet.cmd != Cmd::Session.code() {
        return None;
    }
    let request: SessionRequest = serde_json::from_slice(&packet.payload).ok()?;

    let outcome = {
        let mut registry = registry.lock().expect("relay registry poisoned");
        if !request.verify(&registry.credential) {
            Err("invalid password")
        } else if registry.by_domain.contains_key(&request.domain) {
            Err("domain already exists")
        } else {
            let ip = registry.next_ip;
            registry.next_ip += 1;
            registry.by_domain.insert(request.domain.clone(), ip);
            registry.links.insert(ip, Arc::clone(link));
            Ok(ip)
        }
    };

    let response = match outcome {
        Ok(ip) => SessionResponse::accept(ip),
        Err(msg) => SessionResponse::reject(msg),
    };
    let payload = serde_json::to_vec(&response).ok()?;
    let frame = Packet::new(Cmd::Session.code(), Address::default(), Address::default(), payload);
    deliver(&**link, &frame).await;

    outcome.ok().map(|ip| (ip, request.domain))
}

async fn route(
    registry: &Arc<Mutex<Registry>>,
    caller: &Arc<dyn Transport>,
    caller_domain: &str,
    mut packet: Packet,
) {
    if packet.dist.ip != SWITCHER_IP {
        forward(registry, packet).await;
        return;
    }

    match (packet.kind(), packet.is_ack()) {
        (Some(Cmd::OpenStream), false) => {
            let target = String::from_utf8_lossy(&packet.payload).into_owned();
            match resolve(registry, &target) {
                Some(ip) => {
                    packet.dist.ip = ip;
                    packet.payload = caller_domain.as_bytes().to_vec();
                    forward(registry, packet).await;
                }
                None => {
                    let mut ack = packet.reply(ERR_RESOLVE_DOMAIN.as_bytes().to_vec());
                    ack.src.ip = 0;
                    deliver(&**caller, &ack).await;
                }
            }
        }
        (Some(Cmd::PingDomain), false) => {
            if packet.payload.is_empty() {
                deliver(&**caller, &packet.reply(Vec::new())).await;
                return;
            }
            let target = String::from_utf8_lossy(&packet.payload).into_owned();
            match resolve(registry, &target) {
                Some(ip) => {
                    packet.dist.ip = ip;
                    forward(registry, packet).await;
                }
                None => deliver(&**caller, &packet.reply(ERR_RESOLVE_DOMAIN.as_bytes().to_vec())).await,
            }
        }
        _ => tracing::debug!("relay: ignoring {} addressed to the relay", packet),
    }
}

fn resolve(registry: &Arc<Mutex<Registry>>, domain: &str) -> Option<u16> {
    let registry = registry.lock().expect("relay registry poisoned");
    registry.by_domain.get(domain).copied()
}

async fn forward(registry: &Arc<Mutex<Registry>>, packet: Packet) {
    let link = {
        let registry = registry.lock().expect("relay registry poisoned");
        if registry.blackholed.contains(&packet.dist.ip) {
            return;
        }
        registry.links.get(&packet.dist.ip).cloned()
    };
    match link {
        Some(link) => deliver(&*link, &packet).await,
        None => tracing::debug!("relay: no route to ip {}", packet.dist.ip),
    }
}

async fn deliver(link: &dyn Transport, packet: &Packet) {
    match packet.encode() {
        Ok(bytes) => {
            let _ = link.send(&bytes).await;
        }
        Err(e) => tracing::debug!("relay: cannot encode {}: {}", packet, e),
    }
}
