//! Node orchestration layer
//!
//! A [`Node`] owns one transport connection to the relay. After the session
//! handshake it runs a single task that owns every routing table; the rest
//! of the crate talks to that task through [`Event`](event::Event)s.
//!
//! # Architecture
//!
//! ```text
//!   Node / Stream / Listener handles
//!                │ Event
//!                ▼
//!   ┌──────────────────────────────────────────────┐
//!   │                 NodeDriver                   │
//!   │  PortAllocator  StreamTable  Dialer          │
//!   │  ListenerRegistry  Pinger  timers            │
//!   └──────────────────────────────────────────────┘
//!        ▲ Inbound                      │ Outbox
//!   ┌────┴─────┐                   ┌────▼─────┐
//!   │  reader  │ ◄── Transport ──► │  writer  │
//!   └──────────┘                   └──────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use flex_core::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::default().with_domain("alpha");
//!     let node = Node::connect("relay.example.net:2000", "password", config).await?;
//!
//!     let rtt = node.ping("beta", std::time::Duration::from_secs(5)).await?;
//!     println!("beta is {rtt:?} away");
//!
//!     let mut stream = node.dial("beta", 80).await?;
//!     stream.write(b"hello").await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub(crate) mod driver;
pub(crate) mod event;
#[allow(clippy::module_inception)]
pub mod node;
pub mod session;

pub use config::{KeepaliveConfig, NodeConfig};
pub use node::Node;
pub use session::{SessionRequest, SessionResponse};

use flex_transport::TransportStats;
use std::fmt;

/// Connection lifecycle of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// No transport
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Waiting for the relay's session response
    Handshaking,
    /// Logical IP assigned; streams and pings may be used
    Ready,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Disconnected => "disconnected",
            NodeState::Connecting => "connecting",
            NodeState::Handshaking => "handshaking",
            NodeState::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Snapshot of a node's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Packets queued for the transport
    pub frames_sent: u64,
    /// Frames read from the transport
    pub frames_received: u64,
    /// Inbound frames that were undecodable or matched nothing
    pub frames_dropped: u64,
    /// Streams in the stream table
    pub active_streams: usize,
    /// Bound listener ports
    pub listeners: usize,
    /// Dials waiting for their ack
    pub pending_dials: usize,
    /// Pings waiting for their ack
    pub pending_pings: usize,
    /// Round trip of the last answered keep-alive ping
    pub keepalive_rtt: Option<std::time::Duration>,
    /// Keep-alive pings that failed or timed out
    pub keepalive_failures: u64,
    /// Transport-level counters
    pub transport: TransportStats,
}
