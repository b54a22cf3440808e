//! AES-128 counter mode with random-access offsets.
//!
//! A tunnel direction is a single keystream that starts at the sender's IV.
//! Writes and reads come in arbitrary sizes, so each call resumes the
//! keystream at the direction's running byte offset instead of keeping
//! partial-block state around.

use crate::kdf::StreamKey;
use crate::{BLOCK_SIZE, IV_SIZE};
use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

/// Add `blocks` to a 128-bit big-endian counter, wrapping modulo 2^128.
///
/// The counter is handled as two 64-bit words so the carry out of the low
/// word is explicit.
#[must_use]
pub fn counter_add(counter: &[u8; IV_SIZE], blocks: u64) -> [u8; IV_SIZE] {
    let mut hi_bytes = [0u8; 8];
    let mut lo_bytes = [0u8; 8];
    hi_bytes.copy_from_slice(&counter[..8]);
    lo_bytes.copy_from_slice(&counter[8..]);

    let (lo, carry) = u64::from_be_bytes(lo_bytes).overflowing_add(blocks);
    let hi = u64::from_be_bytes(hi_bytes).wrapping_add(u64::from(carry));

    let mut out = [0u8; IV_SIZE];
    out[..8].copy_from_slice(&hi.to_be_bytes());
    out[8..].copy_from_slice(&lo.to_be_bytes());
    out
}

fn xor_keystream(cipher: &Aes128, iv: &[u8; IV_SIZE], offset: u64, data: &[u8]) -> Vec<u8> {
    let pad = (offset % BLOCK_SIZE as u64) as usize;
    let mut counter = counter_add(iv, offset / BLOCK_SIZE as u64);

    let mut buf = vec![0u8; pad + data.len()];
    buf[pad..].copy_from_slice(data);

    for chunk in buf.chunks_mut(BLOCK_SIZE) {
        let mut block = GenericArray::from(counter);
        cipher.encrypt_block(&mut block);
        for (byte, key) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= key;
        }
        counter = counter_add(&counter, 1);
    }

    buf.split_off(pad)
}

/// Encrypt or decrypt `data` as if it sat at byte `offset` of the keystream
/// that starts at `iv`.
#[must_use]
pub fn apply_keystream_at(key: &StreamKey, iv: &[u8; IV_SIZE], offset: u64, data: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    xor_keystream(&cipher, iv, offset, data)
}

/// One direction of a secret tunnel.
///
/// Owns the expanded key, the direction's IV, and how many bytes have gone
/// through it so far.
#[derive(Clone)]
pub struct OffsetCipher {
    cipher: Aes128,
    iv: [u8; IV_SIZE],
    offset: u64,
}

impl OffsetCipher {
    /// Start a direction at offset zero.
    #[must_use]
    pub fn new(key: &StreamKey, iv: [u8; IV_SIZE]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(key.as_bytes())),
            iv,
            offset: 0,
        }
    }

    /// Bytes processed so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The IV this direction's keystream starts from.
    #[must_use]
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Transform `data` at the current offset and advance past it.
    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        let out = xor_keystream(&self.cipher, &self.iv, self.offset, data);
        self.offset = self.offset.wrapping_add(data.len() as u64);
        out
    }
}

impl std::fmt::Debug for OffsetCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffsetCipher")
            .field("iv", &hex::encode(self.iv))
            .field("offset", &self.offset)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex<const N: usize>(s: &str) -> [u8; N] {
        let bytes = hex::decode(s).unwrap();
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        out
    }

    // NIST SP 800-38A, F.5.1 CTR-AES128.Encrypt
    const NIST_KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const NIST_CTR: &str = "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff";
    const NIST_PT: &str = "6bc1bee22e409f96e93d7e117393172aae2d8a571e03ac9c9eb76fac45af8e51";
    const NIST_CT: &str = "874d6191b620e3261bef6864990db6ce9806f66b7970fdff8617187bb9fffdff";

    #[test]
    fn test_counter_add_simple() {
        let ctr = [0u8; 16];
        let next = counter_add(&ctr, 5);
        assert_eq!(next[15], 5);
        assert_eq!(&next[..15], &[0u8; 15]);
    }

    #[test]
    fn test_counter_add_carries_into_high_word() {
        let mut ctr = [0u8; 16];
        ctr[8..].copy_from_slice(&u64::MAX.to_be_bytes());
        let next = counter_add(&ctr, 1);
        assert_eq!(&next[..8], &1u64.to_be_bytes());
        assert_eq!(&next[8..], &[0u8; 8]);
    }

    #[test]
    fn test_counter_add_wraps_modulo_2_128() {
        let next = counter_add(&[0xFF; 16], 2);
        let mut expected = [0u8; 16];
        expected[15] = 1;
        assert_eq!(next, expected);
    }

    #[test]
    fn test_nist_vector() {
        let key = StreamKey::from_bytes(unhex(NIST_KEY));
        let iv: [u8; 16] = unhex(NIST_CTR);
        let pt = hex::decode(NIST_PT).unwrap();
        let ct = apply_keystream_at(&key, &iv, 0, &pt);
        assert_eq!(hex::encode(ct), NIST_CT);
    }

    #[test]
    fn test_nist_second_block_via_offset() {
        let key = StreamKey::from_bytes(unhex(NIST_KEY));
        let iv: [u8; 16] = unhex(NIST_CTR);
        let pt = hex::decode(NIST_PT).unwrap();
        let ct = apply_keystream_at(&key, &iv, 16, &pt[16..]);
        assert_eq!(hex::encode(ct), &NIST_CT[32..]);
    }

    #[test]
    fn test_unaligned_offset_matches_whole() {
        let key = StreamKey::from_bytes([9u8; 16]);
        let iv = [4u8; 16];
        let data: Vec<u8> = (0..100u8).collect();
        let whole = apply_keystream_at(&key, &iv, 0, &data);
        let tail = apply_keystream_at(&key, &iv, 37, &data[37..]);
        assert_eq!(&whole[37..], &tail[..]);
    }

    #[test]
    fn test_chunked_writes_decrypt_with_other_chunking() {
        let key = StreamKey::from_bytes([1u8; 16]);
        let iv = [2u8; 16];
        let plaintext: Vec<u8> = (0..200).map(|i| (i * 7 % 251) as u8).collect();

        let mut enc = OffsetCipher::new(&key, iv);
        let mut ciphertext = Vec::new();
        for size in [3usize, 17, 1, 16, 40, 123] {
            let start = enc.offset() as usize;
            ciphertext.extend(enc.apply(&plaintext[start..start + size]));
        }
        assert_eq!(enc.offset(), 200);

        let mut dec = OffsetCipher::new(&key, iv);
        let mut recovered = Vec::new();
        for chunk in ciphertext.chunks(33) {
            recovered.extend(dec.apply(chunk));
        }
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_empty_input_does_not_advance() {
        let key = StreamKey::from_bytes([0u8; 16]);
        let mut c = OffsetCipher::new(&key, [0u8; 16]);
        assert!(c.apply(&[]).is_empty());
        assert_eq!(c.offset(), 0);
    }
}
