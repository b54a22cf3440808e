//! # flex Crypto
//!
//! Cryptographic primitives for the flex overlay protocol.
//!
//! This crate provides:
//! - The secret tunnel handshake frame (random IV plus keyed checksum)
//! - Stream key derivation from a shared secret
//! - An AES-128 counter-mode cipher that can start at any byte offset
//! - The session handshake digest sent to the relay
//! - Secure random IV and tag generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Handshake checksum | MD5(IV ‖ secret) | 16 bytes |
//! | KDF | HKDF-SHA1 | fixed salt, empty info |
//! | Stream cipher | AES-128-CTR | 128-bit big-endian counter, two-word carry |
//! | Session digest | SHA-256, base64 | relay login |
//!
//! ## Keystream alignment
//!
//! ```text
//!  offset o ──► counter = IV + o/16        (mod 2^128)
//!
//!  ┌──────── o % 16 ────────┬──────────── data ─────────────┐
//!  │   zero padding         │  bytes to encrypt or decrypt  │
//!  └────────────────────────┴───────────────────────────────┘
//!            discarded                  returned
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod digest;
pub mod error;
pub mod handshake;
pub mod kdf;
pub mod random;

pub use cipher::{OffsetCipher, apply_keystream_at, counter_add};
pub use digest::session_sum;
pub use error::CryptoError;
pub use handshake::{HandshakeFrame, build_frame, verify_frame};
pub use kdf::{StreamKey, derive_stream_key};

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Size of the per-direction initialization vector
pub const IV_SIZE: usize = 16;

/// Size of the derived AES-128 key
pub const KEY_SIZE: usize = 16;

/// Size of the handshake checksum
pub const CHECKSUM_SIZE: usize = 16;

/// Code byte that opens a secret tunnel handshake frame
pub const HANDSHAKE_CODE: u8 = 0x09;

/// Total size of the handshake frame: code, IV, checksum
pub const HANDSHAKE_FRAME_SIZE: usize = 1 + IV_SIZE + CHECKSUM_SIZE;

/// AES block size
pub const BLOCK_SIZE: usize = 16;
