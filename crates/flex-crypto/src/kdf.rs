//! Stream key derivation.
//!
//! Both tunnel directions share one AES-128 key derived from the shared
//! secret alone. The exchanged IVs keep the two keystreams apart.

use crate::{CryptoError, KEY_SIZE};
use hkdf::Hkdf;
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fixed HKDF salt shared with every flex peer
pub const KDF_SALT: &[u8] = b"cipherconn-of-exchanger";

/// Symmetric key for a secret tunnel
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct StreamKey([u8; KEY_SIZE]);

impl StreamKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamKey(..)")
    }
}

/// Derive the tunnel key: HKDF-SHA1 with [`KDF_SALT`] and empty info.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivationFailed`] if expansion fails.
pub fn derive_stream_key(secret: &[u8]) -> Result<StreamKey, CryptoError> {
    let hk = Hkdf::<Sha1>::new(Some(KDF_SALT), secret);
    let mut okm = [0u8; KEY_SIZE];
    hk.expand(&[], &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(StreamKey(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = derive_stream_key(b"secret").unwrap();
        let b = derive_stream_key(b"secret").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_distinct_secrets() {
        let a = derive_stream_key(b"secret-a").unwrap();
        let b = derive_stream_key(b"secret-b").unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_empty_secret_still_derives() {
        let key = derive_stream_key(b"").unwrap();
        assert_ne!(key.as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn test_debug_hides_key() {
        let key = derive_stream_key(b"x").unwrap();
        assert_eq!(format!("{key:?}"), "StreamKey(..)");
    }
}
