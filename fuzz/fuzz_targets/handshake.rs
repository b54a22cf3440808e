//! Fuzz target for the secret tunnel handshake
//!
//! Feeds arbitrary frames and secrets to the verifier, and checks the
//! offset cipher stays consistent for arbitrary chunking.

#![no_main]

use arbitrary::Arbitrary;
use flex_crypto::{OffsetCipher, apply_keystream_at, derive_stream_key, verify_frame};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct HandshakeInput {
    frame: Vec<u8>,
    secret: Vec<u8>,
    iv: [u8; 16],
    data: Vec<u8>,
    split: usize,
}

fuzz_target!(|input: HandshakeInput| {
    // Arbitrary frames must be rejected or accepted, never panic
    let _ = verify_frame(&input.frame, &input.secret);

    let Ok(key) = derive_stream_key(&input.secret) else {
        return;
    };
    let split = input.split % (input.data.len() + 1);
    let mut cipher = OffsetCipher::new(&key, input.iv);
    let mut out = cipher.apply(&input.data[..split]);
    out.extend(cipher.apply(&input.data[split..]));
    assert_eq!(out, apply_keystream_at(&key, &input.iv, 0, &input.data));
});
