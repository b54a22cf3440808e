//! # flex Core
//!
//! Core protocol implementation for the flex overlay network.
//!
//! One physical connection to a relay carries many logical streams between
//! nodes. This crate provides:
//! - Packet encoding and decoding (11-byte header)
//! - Logical port allocation
//! - Stream multiplexing with per-stream credit flow control
//! - Secret tunnels: AES-128-CTR over a stream, keyed by a shared secret
//! - Domain-addressed latency pings
//! - The node task tying these to a transport
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Node                                   │
//! │   (session with the relay, one task owning all routing state)   │
//! ├──────────────────────────────────────────┬──────────────────────┤
//! │          Connection Multiplexer          │        Pinger        │
//! │   (dialer, listener registry, streams)   │   (send, answer)     │
//! ├──────────────────────────────────────────┴──────────────────────┤
//! │                        Packets                                  │
//! │   cmd │ dist ip │ dist port │ src ip │ src port │ len │ payload │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Secret tunnels sit on top of any [`Channel`], most often a [`Stream`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod error;
pub mod mux;
pub mod node;
pub(crate) mod outbox;
pub mod packet;
pub mod pinger;
pub mod port;
pub mod secret;
pub mod stream;

pub use channel::Channel;
pub use error::{Error, FrameError, Result};
pub use mux::{DialTarget, Listener};
pub use node::{KeepaliveConfig, Node, NodeConfig, NodeState, NodeStats};
pub use packet::{Address, Cmd, Packet};
pub use port::PortAllocator;
pub use secret::{SecretListener, SecretStream};
pub use stream::{Stream, StreamKey, StreamState, StreamStats, WindowConfig};
