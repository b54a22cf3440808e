//! Fuzz target for packet decoding
//!
//! Tests that the packet decoder handles arbitrary input without panicking,
//! and that anything it accepts encodes back to a prefix of the input.

#![no_main]

use flex_core::packet::{HEADER_SIZE, decode_data_ack};
use flex_core::Packet;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::decode(data) {
        let encoded = packet.encode().expect("decoded packet re-encodes");
        assert_eq!(&encoded[..HEADER_SIZE - 2], &data[..HEADER_SIZE - 2]);
        assert_eq!(&encoded[HEADER_SIZE..], &packet.payload[..]);
        let _ = decode_data_ack(&packet.payload);
    }
});
