//! # Secret Tunnels
//!
//! Encrypted channels layered over any [`Channel`](crate::Channel), keyed by
//! a secret both ends know in advance.
//!
//! ```text
//!   local                                              remote
//!     │── 0x09 ‖ IV_l ‖ MD5(IV_l ‖ secret) ──────────────►│
//!     │◄────────────── 0x09 ‖ IV_r ‖ MD5(IV_r ‖ secret) ──│
//!     │                                                   │
//!     │   key = HKDF-SHA1(secret)                         │
//!     │── AES-128-CTR(key, IV_l) ────────────────────────►│
//!     │◄──────────────────────── AES-128-CTR(key, IV_r) ──│
//! ```
//!
//! Both frames are sent without waiting on the peer. Bytes that arrive in
//! the same chunk as the peer's frame are already ciphertext.

mod listener;
mod stream;

pub use listener::SecretListener;
pub use stream::SecretStream;

use std::time::Duration;

/// Time allowed for the peer's handshake frame to arrive
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
