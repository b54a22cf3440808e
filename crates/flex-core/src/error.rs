//! Error types for the flex core protocol.
//!
//! Every fallible operation in this crate returns [`Error`]. Errors travel
//! through oneshot channels from the node task back to callers, so the type
//! is `Clone` and carries owned text rather than source errors.

use crate::stream::StreamKey;
use std::borrow::Cow;
use thiserror::Error;

/// Core protocol errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Frame could not be decoded or encoded
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    // ============ Port Errors ============
    /// No free port left in the allocation range
    #[error("no free ports available")]
    PortsExhausted,

    /// Port is already claimed
    #[error("port {0} is already used")]
    PortAlreadyInUse(u16),

    /// Port falls outside the allocator's range
    #[error("invalid port number: {0}")]
    OutOfRangePort(u16),

    // ============ Multiplexer Errors ============
    /// A stream with the same key is already registered
    #[error("stream already exists: {0}")]
    DuplicateStream(StreamKey),

    /// A request with the same correlation id is already pending
    #[error("request {0} already pending")]
    DuplicateRequest(u16),

    /// No open-stream ack arrived in time
    #[error("dial timed out")]
    DialTimeout,

    /// Remote side refused the stream; carries the ack's error text
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    // ============ Pinger Errors ============
    /// No ping ack arrived in time
    #[error("ping timed out")]
    PingTimeout,

    /// Ping answered with an error payload
    #[error("ping rejected: {0}")]
    PingRejected(String),

    // ============ Stream Errors ============
    /// Operation requires an established stream
    #[error("stream not connected")]
    StreamNotConnected,

    /// Stream closed while the operation was outstanding
    #[error("stream closed")]
    StreamClosed,

    // ============ Secret Tunnel Errors ============
    /// Peer's tunnel handshake frame did not verify
    #[error("invalid handshake: {0}")]
    InvalidHandshake(Cow<'static, str>),

    /// Tunnel handshake did not complete in time
    #[error("handshake timed out")]
    HandshakeTimeout,

    // ============ Session Errors ============
    /// Relay rejected or never answered the session handshake
    #[error("session handshake failed: {0}")]
    SessionHandshakeFailed(Cow<'static, str>),

    /// Node has not finished its session handshake
    #[error("node not ready")]
    NotReady,

    /// Node's transport is gone
    #[error("node disconnected")]
    Disconnected,

    /// I/O failure on the underlying connection
    #[error("I/O error: {0}")]
    Io(Cow<'static, str>),

    /// Transport operation failed
    #[error("transport error: {0}")]
    Transport(Cow<'static, str>),

    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(#[from] flex_crypto::CryptoError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),
}

impl Error {
    /// Returns true if retrying the operation later may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DialTimeout
                | Error::PingTimeout
                | Error::HandshakeTimeout
                | Error::PortsExhausted
                | Error::Transport(_)
                | Error::Io(_)
        )
    }

    /// Returns true if the error is a timeout of an asynchronous request
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::DialTimeout | Error::PingTimeout | Error::HandshakeTimeout
        )
    }
}

impl From<flex_transport::TransportError> for Error {
    fn from(err: flex_transport::TransportError) -> Self {
        match err {
            err if err.is_closed() => Error::Disconnected,
            flex_transport::TransportError::Io(e) => Error::Io(e.to_string().into()),
            err => Error::Transport(err.to_string().into()),
        }
    }
}

/// Frame-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Payload does not fit the 16-bit length field
    #[error("payload of {0} bytes exceeds the maximum")]
    PayloadOverflow(usize),

    /// Frame parsed but its contents make no sense for its command
    #[error("malformed frame: {0}")]
    Malformed(Cow<'static, str>),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use flex_transport::TransportError;

    #[test]
    fn test_transport_closed_maps_to_disconnected() {
        assert_eq!(Error::from(TransportError::Closed), Error::Disconnected);
        assert!(matches!(
            Error::from(TransportError::Other("boom".into())),
            Error::Transport(_)
        ));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::DialTimeout.is_transient());
        assert!(Error::PingTimeout.is_timeout());
        assert!(!Error::ConnectionRefused("x".into()).is_transient());
        assert!(!Error::InvalidHandshake("x".into()).is_transient());
    }

    #[test]
    fn test_display_carries_remote_text() {
        let err = Error::ConnectionRefused("connection refused".into());
        assert_eq!(err.to_string(), "connection refused: connection refused");
    }
}
