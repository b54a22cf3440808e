//! Secret tunnel handshake frame.
//!
//! Both ends of a tunnel send the same 33-byte frame and verify the one they
//! receive. Neither side waits for the other before sending.
//!
//! ```text
//! ┌──────┬────────────────┬──────────────────────────┐
//! │ code │     IV (16)    │  MD5(IV ‖ secret) (16)   │
//! └──────┴────────────────┴──────────────────────────┘
//! ```

use crate::random::random_iv;
use crate::{CHECKSUM_SIZE, CryptoError, HANDSHAKE_CODE, HANDSHAKE_FRAME_SIZE, IV_SIZE};
use md5::{Digest, Md5};
use subtle::ConstantTimeEq;

/// A parsed or locally generated handshake frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFrame {
    /// IV chosen by the sender; seeds the sender's write direction
    pub iv: [u8; IV_SIZE],
    /// Keyed checksum over the IV
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl HandshakeFrame {
    /// Build a frame for a known IV.
    #[must_use]
    pub fn new(iv: [u8; IV_SIZE], secret: &[u8]) -> Self {
        Self {
            iv,
            checksum: checksum(&iv, secret),
        }
    }

    /// Build a frame around a fresh random IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate(secret: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self::new(random_iv()?, secret))
    }

    /// Parse the first [`HANDSHAKE_FRAME_SIZE`] bytes of `bytes`.
    ///
    /// Trailing bytes are ignored; the caller treats them as ciphertext.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is short or the code byte is wrong.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < HANDSHAKE_FRAME_SIZE {
            return Err(CryptoError::FrameTooShort {
                expected: HANDSHAKE_FRAME_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[0] != HANDSHAKE_CODE {
            return Err(CryptoError::InvalidCode(bytes[0]));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[1..1 + IV_SIZE]);
        let mut sum = [0u8; CHECKSUM_SIZE];
        sum.copy_from_slice(&bytes[1 + IV_SIZE..HANDSHAKE_FRAME_SIZE]);

        Ok(Self { iv, checksum: sum })
    }

    /// Check the frame's checksum against the local copy of the secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::ChecksumMismatch`] if the peer used a different secret.
    pub fn verify(&self, secret: &[u8]) -> Result<(), CryptoError> {
        let expected = checksum(&self.iv, secret);
        if bool::from(expected.ct_eq(&self.checksum)) {
            Ok(())
        } else {
            Err(CryptoError::ChecksumMismatch)
        }
    }

    /// Serialize to wire bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HANDSHAKE_FRAME_SIZE] {
        let mut out = [0u8; HANDSHAKE_FRAME_SIZE];
        out[0] = HANDSHAKE_CODE;
        out[1..1 + IV_SIZE].copy_from_slice(&self.iv);
        out[1 + IV_SIZE..].copy_from_slice(&self.checksum);
        out
    }
}

/// Compute `MD5(iv ‖ secret)`.
#[must_use]
pub fn checksum(iv: &[u8; IV_SIZE], secret: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let mut hasher = Md5::new();
    hasher.update(iv);
    hasher.update(secret);
    hasher.finalize().into()
}

/// Build the wire frame for `iv` under `secret`.
#[must_use]
pub fn build_frame(iv: [u8; IV_SIZE], secret: &[u8]) -> [u8; HANDSHAKE_FRAME_SIZE] {
    HandshakeFrame::new(iv, secret).to_bytes()
}

/// Parse and verify a received frame, returning the peer's IV.
///
/// # Errors
///
/// Fails if the frame is short, carries the wrong code, or was built with a
/// different secret.
pub fn verify_frame(bytes: &[u8], secret: &[u8]) -> Result<[u8; IV_SIZE], CryptoError> {
    let frame = HandshakeFrame::parse(bytes)?;
    frame.verify(secret)?;
    Ok(frame.iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let iv = [7u8; IV_SIZE];
        let bytes = build_frame(iv, b"s3cret");
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[0], HANDSHAKE_CODE);
        assert_eq!(&bytes[1..17], &iv);
        assert_eq!(&bytes[17..], &checksum(&iv, b"s3cret"));
    }

    #[test]
    fn test_checksum_is_md5_of_iv_and_secret() {
        // MD5("") is the well-known d41d8cd9...; prefixing the IV must change it.
        let empty: [u8; 16] = Md5::digest(b"").into();
        assert_eq!(hex::encode(empty), "d41d8cd98f00b204e9800998ecf8427e");

        let iv = [0u8; IV_SIZE];
        let mut joined = iv.to_vec();
        joined.extend_from_slice(b"pw");
        let direct: [u8; 16] = Md5::digest(&joined).into();
        assert_eq!(checksum(&iv, b"pw"), direct);
    }

    #[test]
    fn test_verify_same_secret() {
        let frame = HandshakeFrame::generate(b"shared").unwrap();
        let iv = verify_frame(&frame.to_bytes(), b"shared").unwrap();
        assert_eq!(iv, frame.iv);
    }

    #[test]
    fn test_verify_wrong_secret() {
        let frame = HandshakeFrame::generate(b"alpha").unwrap();
        assert_eq!(
            verify_frame(&frame.to_bytes(), b"beta"),
            Err(CryptoError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_wrong_code() {
        let mut bytes = build_frame([1u8; IV_SIZE], b"x");
        bytes[0] = 0x0A;
        assert_eq!(
            verify_frame(&bytes, b"x"),
            Err(CryptoError::InvalidCode(0x0A))
        );
    }

    #[test]
    fn test_short_frame() {
        let err = HandshakeFrame::parse(&[HANDSHAKE_CODE; 20]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::FrameTooShort {
                expected: 33,
                actual: 20
            }
        );
        assert!(err.is_handshake_rejection());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = build_frame([3u8; IV_SIZE], b"k").to_vec();
        bytes.extend_from_slice(b"ciphertext follows");
        assert_eq!(verify_frame(&bytes, b"k").unwrap(), [3u8; IV_SIZE]);
    }
}
