//! Session handshake digest.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

/// Compute the relay login checksum.
///
/// `base64(SHA-256("CalcSumStart,<domain>,<tag>,<credential>,<timestamp>,CalcSumEnd"))`
#[must_use]
pub fn session_sum(domain: &str, tag: &str, credential: &str, timestamp: i64) -> String {
    let text = format!("CalcSumStart,{domain},{tag},{credential},{timestamp},CalcSumEnd");
    STANDARD.encode(Sha256::digest(text.as_bytes()))
}
