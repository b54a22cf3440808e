//! # flex Transport
//!
//! Physical transport layer for the flex overlay protocol.
//!
//! A node owns exactly one transport: an ordered, reliable duplex channel
//! that preserves frame boundaries. This crate provides:
//! - The [`Transport`] trait the node is written against
//! - [`TcpTransport`], which recovers frame boundaries from the 11-byte
//!   packet header on a TCP byte stream
//! - [`WsTransport`], one binary WebSocket message per frame
//! - [`MemoryTransport`], an in-process pair for tests and embedding
//!
//! The core never retransmits; it relies on the transport for order and
//! delivery, or for reporting closure.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod tcp;
pub mod transport;
pub mod ws;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use ws::WsTransport;

/// Size of the packet header used to find frame boundaries on byte streams
pub const FRAME_HEADER_SIZE: usize = 11;

/// Byte offset of the big-endian payload length inside the header
pub const LENGTH_FIELD_OFFSET: usize = 9;

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on TCP sockets
    pub nodelay: bool,
    /// Give up connecting after this long
    pub connect_timeout: std::time::Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            connect_timeout: std::time::Duration::from_secs(10),
        }
    }
}
