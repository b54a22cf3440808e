//! Property-based tests for flex
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Packet Codec Properties
// ============================================================================

mod packet_properties {
    use super::*;
    use flex_core::packet::{HEADER_SIZE, decode_data_ack, encode_data_ack};
    use flex_core::{Address, Packet};

    proptest! {
        /// Encoding then decoding yields the same packet
        #[test]
        fn packet_roundtrip(
            cmd in any::<u8>(),
            dist_ip in any::<u16>(),
            dist_port in any::<u16>(),
            src_ip in any::<u16>(),
            src_port in any::<u16>(),
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let packet = Packet::new(
                cmd,
                Address::new(dist_ip, dist_port),
                Address::new(src_ip, src_port),
                payload,
            );
            let encoded = packet.encode().unwrap();
            prop_assert_eq!(encoded.len(), HEADER_SIZE + packet.payload.len());
            prop_assert_eq!(Packet::decode(&encoded).unwrap(), packet);
        }

        /// Decoding arbitrary bytes never panics and never reads past the input
        #[test]
        fn decode_arbitrary_bytes(data in prop::collection::vec(any::<u8>(), 0..512)) {
            match Packet::decode(&data) {
                Ok(packet) => {
                    prop_assert!(data.len() >= HEADER_SIZE);
                    let declared = u16::from_be_bytes([data[9], data[10]]) as usize;
                    prop_assert_eq!(packet.payload.len(), declared.min(data.len() - HEADER_SIZE));
                }
                Err(_) => prop_assert!(data.len() < HEADER_SIZE),
            }
        }

        /// The ack flag is the low bit and never changes addressing
        #[test]
        fn reply_swaps_addresses(cmd in (0u8..6).prop_map(|c| c * 2), a in any::<u16>(), b in any::<u16>()) {
            let packet = Packet::new(cmd, Address::new(a, 1), Address::new(b, 2), Vec::new());
            let ack = packet.reply(Vec::new());
            prop_assert!(ack.is_ack());
            prop_assert!(!packet.is_ack());
            prop_assert_eq!(ack.raw_cmd(), packet.raw_cmd());
            prop_assert_eq!(ack.dist, packet.src);
            prop_assert_eq!(ack.src, packet.dist);
        }

        /// Data ack payloads carry the count big-endian
        #[test]
        fn data_ack_count(count in any::<u16>()) {
            let payload = encode_data_ack(count);
            prop_assert_eq!(payload.len(), 2);
            prop_assert_eq!(decode_data_ack(&payload).unwrap(), count);
        }
    }
}

// ============================================================================
// Port Allocator Properties
// ============================================================================

mod port_properties {
    use super::*;
    use flex_core::PortAllocator;
    use std::collections::HashSet;

    proptest! {
        /// Allocations are distinct, in range, and exhaust exactly the span
        #[test]
        fn allocations_are_unique(lo in 1u16..60000, width in 0u16..64) {
            let hi = lo.saturating_add(width);
            let mut ports = PortAllocator::new(lo, hi);
            let span = usize::from(hi - lo) + 1;

            let mut seen = HashSet::new();
            for _ in 0..span {
                let port = ports.allocate().unwrap();
                prop_assert!((lo..=hi).contains(&port));
                prop_assert!(seen.insert(port), "port {} handed out twice", port);
            }
            prop_assert!(ports.allocate().is_err());
            prop_assert_eq!(ports.used_count(), span);
        }

        /// A released port becomes available again
        #[test]
        fn release_makes_port_reusable(width in 1u16..32, pick in any::<prop::sample::Index>()) {
            let mut ports = PortAllocator::new(100, 100 + width);
            let all: Vec<u16> = (0..=width).map(|_| ports.allocate().unwrap()).collect();
            let freed = all[pick.index(all.len())];

            ports.release(freed);
            prop_assert!(!ports.is_used(freed));
            prop_assert_eq!(ports.allocate().unwrap(), freed);
        }

        /// Reserving outside the range is rejected without side effects
        #[test]
        fn reserve_out_of_range(port in 0u16..100) {
            let mut ports = PortAllocator::new(100, 200);
            prop_assert!(ports.reserve(port).is_err());
            prop_assert_eq!(ports.used_count(), 0);
        }
    }
}

// ============================================================================
// Tunnel Cipher Properties
// ============================================================================

mod cipher_properties {
    use super::*;
    use flex_crypto::{OffsetCipher, apply_keystream_at, counter_add, derive_stream_key};

    proptest! {
        /// Splitting a direction into arbitrary chunks does not change the ciphertext
        #[test]
        fn chunking_is_invisible(
            data in prop::collection::vec(any::<u8>(), 0..512),
            cuts in prop::collection::vec(0usize..64, 0..16),
            iv in any::<[u8; 16]>(),
        ) {
            let key = derive_stream_key(b"property secret").unwrap();
            let whole = apply_keystream_at(&key, &iv, 0, &data);

            let mut cipher = OffsetCipher::new(&key, iv);
            let mut pieces = Vec::with_capacity(data.len());
            let mut rest = &data[..];
            for cut in cuts {
                let (head, tail) = rest.split_at(cut.min(rest.len()));
                pieces.extend(cipher.apply(head));
                rest = tail;
            }
            pieces.extend(cipher.apply(rest));

            prop_assert_eq!(pieces, whole);
            prop_assert_eq!(cipher.offset(), data.len() as u64);
        }

        /// Applying the keystream twice restores the plaintext
        #[test]
        fn keystream_is_involution(
            data in prop::collection::vec(any::<u8>(), 0..256),
            offset in 0u64..10_000,
            iv in any::<[u8; 16]>(),
        ) {
            let key = derive_stream_key(b"k").unwrap();
            let once = apply_keystream_at(&key, &iv, offset, &data);
            prop_assert_eq!(apply_keystream_at(&key, &iv, offset, &once), data);
        }

        /// Counter addition matches 128-bit integer addition
        #[test]
        fn counter_add_matches_u128(counter in any::<u128>(), blocks in any::<u64>()) {
            let sum = counter_add(&counter.to_be_bytes(), blocks);
            prop_assert_eq!(u128::from_be_bytes(sum), counter.wrapping_add(u128::from(blocks)));
        }
    }
}

// ============================================================================
// Secret Handshake Properties
// ============================================================================

mod handshake_properties {
    use super::*;
    use flex_crypto::{HANDSHAKE_FRAME_SIZE, build_frame, verify_frame};

    proptest! {
        /// A frame verifies under its own secret and yields its IV
        #[test]
        fn frame_verifies(iv in any::<[u8; 16]>(), secret in prop::collection::vec(any::<u8>(), 0..64)) {
            let frame = build_frame(iv, &secret);
            prop_assert_eq!(frame.len(), HANDSHAKE_FRAME_SIZE);
            prop_assert_eq!(verify_frame(&frame, &secret).unwrap(), iv);
        }

        /// Any single flipped bit is detected
        #[test]
        fn tampering_detected(
            iv in any::<[u8; 16]>(),
            index in 0usize..HANDSHAKE_FRAME_SIZE,
            bit in 0u8..8,
        ) {
            let mut frame = build_frame(iv, b"secret");
            frame[index] ^= 1 << bit;
            prop_assert!(verify_frame(&frame, b"secret").is_err());
        }
    }
}
