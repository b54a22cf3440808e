//! Session handshake with the relay.
//!
//! The first frame a node sends is a session request; the relay answers
//! with the node's logical IP or an error. Both travel as JSON in command
//! `0x00` frames with zero addresses.

use crate::error::{Error, Result};
use crate::packet::{Address, Cmd, Packet};
use flex_crypto::session_sum;
use flex_transport::Transport;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Protocol version sent in session requests
pub const SESSION_VERSION: u32 = 20221204;

/// Login request sent to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionRequest {
    /// Protocol version
    pub version: u32,
    /// Domain the node wants to be reachable at
    pub domain: String,
    /// Per-session tag
    #[serde(rename = "Mac")]
    pub tag: String,
    /// Unix time in nanoseconds
    pub timestamp: i64,
    /// Digest binding the fields above to the credential
    pub sum: String,
}

impl SessionRequest {
    /// Build a signed request stamped with the current time.
    #[must_use]
    pub fn new(domain: &str, tag: &str, credential: &str) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self::with_timestamp(domain, tag, credential, timestamp)
    }

    /// Build a signed request for a fixed timestamp.
    #[must_use]
    pub fn with_timestamp(domain: &str, tag: &str, credential: &str, timestamp: i64) -> Self {
        Self {
            version: SESSION_VERSION,
            domain: domain.to_owned(),
            tag: tag.to_owned(),
            timestamp,
            sum: session_sum(domain, tag, credential, timestamp),
        }
    }

    /// Whether the digest matches `credential`.
    #[must_use]
    pub fn verify(&self, credential: &str) -> bool {
        self.sum == session_sum(&self.domain, &self.tag, credential, self.timestamp)
    }
}

/// Relay's answer to a [`SessionRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionResponse {
    /// Zero on success
    pub err_code: i32,
    /// Assigned logical IP
    #[serde(rename = "IP")]
    pub ip: u16,
    /// Relay protocol version
    pub version: u32,
    /// Error text when `err_code` is nonzero
    pub err_msg: String,
}

impl SessionResponse {
    /// Successful response assigning `ip`.
    #[must_use]
    pub fn accept(ip: u16) -> Self {
        Self {
            ip,
            version: SESSION_VERSION,
            ..Self::default()
        }
    }

    /// Failed response.
    #[must_use]
    pub fn reject(msg: impl Into<String>) -> Self {
        Self {
            err_code: -1,
            err_msg: msg.into(),
            version: SESSION_VERSION,
            ..Self::default()
        }
    }
}

/// Wrap a JSON session message in a command `0x00` frame.
pub(crate) fn session_frame<T: Serialize>(message: &T) -> Result<Packet> {
    let payload = serde_json::to_vec(message)
        .map_err(|e| Error::SessionHandshakeFailed(format!("encode: {e}").into()))?;
    Ok(Packet::new(
        Cmd::Session.code(),
        Address::default(),
        Address::default(),
        payload,
    ))
}

/// Log in to the relay, returning the assigned IP.
///
/// Frames other than session frames that arrive first are skipped.
pub(crate) async fn perform(
    transport: &dyn Transport,
    domain: &str,
    credential: &str,
    timeout: Duration,
) -> Result<u16> {
    let tag = format!("flex-{}", flex_crypto::random::random_hex(3)?);
    let request = SessionRequest::new(domain, &tag, credential);
    let frame = session_frame(&request)?.encode()?;
    transport.send(&frame).await?;
    tracing::debug!("session request sent for {} (tag {})", domain, tag);

    let response = tokio::time::timeout(timeout, await_response(transport))
        .await
        .map_err(|_| Error::SessionHandshakeFailed("no response from relay".into()))??;

    if response.err_code != 0 {
        tracing::warn!("relay rejected session for {}: {}", domain, response.err_msg);
        return Err(Error::SessionHandshakeFailed(response.err_msg.into()));
    }
    Ok(response.ip)
}

async fn await_response(transport: &dyn Transport) -> Result<SessionResponse> {
    loop {
        let bytes = transport.recv().await?;
        let packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("undecodable frame during session handshake: {}", e);
                continue;
            }
        };
        if packet.cmd != Cmd::Session.code() {
            tracing::debug!("skipping {} before session response", packet);
            continue;
        }
        return serde_json::from_slice(&packet.payload)
            .map_err(|e| Error::SessionHandshakeFailed(format!("bad response: {e}").into()));
    }
}
