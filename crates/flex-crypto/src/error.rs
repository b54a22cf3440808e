//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Handshake frame shorter than required
    #[error("handshake frame too short: expected {expected}, got {actual}")]
    FrameTooShort {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Handshake frame opened with the wrong code byte
    #[error("invalid handshake code: 0x{0:02X}")]
    InvalidCode(u8),

    /// Checksum did not match the local secret
    #[error("handshake checksum mismatch")]
    ChecksumMismatch,

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Random number generation failed
    #[error("random number generation failed")]
    RandomFailed,
}

impl CryptoError {
    /// Returns true if the error came from checking a peer's handshake frame
    #[must_use]
    pub fn is_handshake_rejection(&self) -> bool {
        matches!(
            self,
            CryptoError::FrameTooShort { .. }
                | CryptoError::InvalidCode(_)
                | CryptoError::ChecksumMismatch
        )
    }
}
