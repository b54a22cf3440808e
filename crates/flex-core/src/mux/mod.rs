//! Connection multiplexer: dialer, listener registry and stream table.
//!
//! ```text
//!             open-stream ack ──► Dialer ─────────┐
//!                                                  ├──► StreamTable ──► StreamCore
//!         open-stream request ──► ListenerRegistry ┘         ▲
//!                                                            │
//!           push-stream-data / close-stream ─────────────────┘
//! ```

pub(crate) mod dialer;
pub(crate) mod listener;
pub(crate) mod pending;
pub(crate) mod table;

pub use dialer::DialTarget;
pub use listener::{ERR_CONNECTION_REFUSED, ERR_STREAM_EXISTS, Listener};
