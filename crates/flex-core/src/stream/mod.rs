//! Streams: ordered, flow-controlled logical channels.
//!
//! A stream is split in two. [`StreamCore`](core::StreamCore) is the state
//! machine and write queue, owned by the node task inside the stream table.
//! [`Stream`] is the handle given to applications; it talks to its core
//! through the node's event channel and receives data on its own channel.
//!
//! ```text
//!                  Dialing ──┐
//!                            ├──► Establish ──┬──► LocalClose ──┐
//!                Accepting ──┘                └──► RemoteClose ─┴──► Closed
//! ```

pub(crate) mod core;
pub mod handle;
pub mod window;

pub use handle::Stream;
pub use window::WindowConfig;

use crate::node::event::Event;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Stream lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Waiting for the open-stream ack
    Dialing,
    /// Inbound open accepted, ack not yet sent
    Accepting,
    /// Data may flow both ways
    Establish,
    /// Local side sent close
    LocalClose,
    /// Peer sent close
    RemoteClose,
    /// Fully closed
    Closed,
}

impl StreamState {
    /// Whether writes are accepted in this state
    #[must_use]
    pub fn is_writable(self) -> bool {
        matches!(self, StreamState::Establish | StreamState::RemoteClose)
    }

    /// Whether the stream has started or finished closing
    #[must_use]
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            StreamState::LocalClose | StreamState::RemoteClose | StreamState::Closed
        )
    }
}

/// Identity of a stream within a node's stream table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    /// Port on this node
    pub local_port: u16,
    /// Peer's logical IP
    pub remote_ip: u16,
    /// Peer's port
    pub remote_port: u16,
}

impl StreamKey {
    /// Create a key.
    #[must_use]
    pub const fn new(local_port: u16, remote_ip: u16, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_ip,
            remote_port,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}<->{}:{}",
            self.local_port, self.remote_ip, self.remote_port
        )
    }
}

/// Per-stream traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Payload bytes written to the peer
    pub bytes_sent: u64,
    /// Payload bytes delivered to the reader
    pub bytes_received: u64,
    /// Data frames sent
    pub frames_sent: u64,
    /// Data frames received
    pub frames_received: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
}

impl StreamCounters {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_recv(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StreamStats {
        StreamStats {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
        }
    }
}

/// What a node hands to every stream it creates
#[derive(Debug, Clone)]
pub(crate) struct StreamContext {
    pub(crate) events: mpsc::UnboundedSender<Event>,
    pub(crate) local_domain: String,
    pub(crate) window: WindowConfig,
}
