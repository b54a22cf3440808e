//! Messages handled by the node task.

use crate::error::Result;
use crate::mux::DialTarget;
use crate::node::NodeStats;
use crate::packet::Packet;
use crate::stream::window::WriteDone;
use crate::stream::{Stream, StreamKey};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Timer that fired for a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Dial waiting on `port`
    Dial { port: u16, token: u64 },
    /// Ping waiting on correlation id `id`
    Ping { id: u16, token: u64 },
}

/// Everything the node task reacts to
#[derive(Debug)]
pub(crate) enum Event {
    // ═══ Application requests ═══
    Dial {
        target: DialTarget,
        reply: oneshot::Sender<Result<Stream>>,
    },
    Listen {
        port: u16,
        accept: mpsc::UnboundedSender<Stream>,
        reply: oneshot::Sender<Result<()>>,
    },
    Unlisten {
        port: u16,
    },
    Write {
        key: StreamKey,
        serial: u64,
        data: Vec<u8>,
        done: WriteDone,
    },
    CloseStream {
        key: StreamKey,
        serial: u64,
    },
    Ping {
        domain: String,
        timeout: Duration,
        reply: oneshot::Sender<Result<Duration>>,
    },
    Send {
        packet: Packet,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<NodeStats>,
    },
    Disconnect,

    // ═══ Internal ═══
    Expire(Expiry),
    Inbound(Vec<u8>),
    TransportClosed(String),
    Keepalive(Result<Duration>),
}
