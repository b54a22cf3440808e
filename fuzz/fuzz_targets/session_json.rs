//! Fuzz target for session message parsing
//!
//! Relay responses arrive as untrusted JSON; parsing must never panic.

#![no_main]

use flex_core::node::{SessionRequest, SessionResponse};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<SessionResponse>(data);
    if let Ok(request) = serde_json::from_slice::<SessionRequest>(data) {
        let _ = request.verify("fuzz");
    }
});
