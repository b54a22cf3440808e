//! Packet encoding and decoding for the flex wire protocol.
//!
//! Every frame is a fixed 11-byte header followed by the payload. All
//! multi-byte fields are big-endian (network byte order).
//!
//! ```text
//!  0       1       3        5       7        9          11
//! ┌───────┬───────┬────────┬───────┬────────┬──────────┬──────────────┐
//! │  cmd  │distIp │distPort│ srcIp │srcPort │payloadLen│   payload    │
//! └───────┴───────┴────────┴───────┴────────┴──────────┴──────────────┘
//! ```
//!
//! Bit 0 of `cmd` is the ack flag; the remaining bits select the command.

use crate::error::FrameError;
use std::fmt;

/// Fixed packet header size in bytes
pub const HEADER_SIZE: usize = 11;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Ack flag carried in bit 0 of the command byte
pub const ACK_FLAG: u8 = 0x01;

/// Logical IP of the relay that resolves domains and forwards frames
pub const SWITCHER_IP: u16 = 0xFFFF;

/// Raw command codes (ack flag cleared)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cmd {
    /// Session handshake with the relay
    Session = 0x00,
    /// Open a stream to a listening port
    OpenStream = 0x02,
    /// Close a stream
    CloseStream = 0x04,
    /// Stream data; the ack carries the consumed byte count
    PushStreamData = 0x06,
    /// Reserved and ignored
    PushMessage = 0x08,
    /// Latency ping addressed by domain
    PingDomain = 0x0A,
}

impl Cmd {
    /// Map a raw command byte (ack flag cleared) to a known command.
    #[must_use]
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::Session),
            0x02 => Some(Self::OpenStream),
            0x04 => Some(Self::CloseStream),
            0x06 => Some(Self::PushStreamData),
            0x08 => Some(Self::PushMessage),
            0x0A => Some(Self::PingDomain),
            _ => None,
        }
    }

    /// The command byte for a request.
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// The command byte for this command's ack.
    #[must_use]
    pub fn ack(self) -> u8 {
        self as u8 | ACK_FLAG
    }
}

/// A logical overlay address.
///
/// The IP is assigned to a node by the relay; it has nothing to do with
/// network addresses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Logical node IP
    pub ip: u16,
    /// Logical port on that node
    pub port: u16,
}

impl Address {
    /// Create an address.
    #[must_use]
    pub const fn new(ip: u16, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A decoded flex frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Command byte including the ack flag
    pub cmd: u8,
    /// Destination address
    pub dist: Address,
    /// Source address
    pub src: Address,
    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet from its parts.
    #[must_use]
    pub fn new(cmd: u8, dist: Address, src: Address, payload: Vec<u8>) -> Self {
        Self {
            cmd,
            dist,
            src,
            payload,
        }
    }

    /// Command byte with the ack flag cleared.
    #[must_use]
    pub fn raw_cmd(&self) -> u8 {
        self.cmd & !ACK_FLAG
    }

    /// Whether the ack flag is set.
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.cmd & ACK_FLAG != 0
    }

    /// The known command, if any.
    #[must_use]
    pub fn kind(&self) -> Option<Cmd> {
        Cmd::from_raw(self.raw_cmd())
    }

    /// Build the ack for this packet: same raw command with the ack flag
    /// set, addresses swapped.
    #[must_use]
    pub fn reply(&self, payload: Vec<u8>) -> Packet {
        Packet::new(self.raw_cmd() | ACK_FLAG, self.src, self.dist, payload)
    }

    /// Encoded size: header plus payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadOverflow`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`].
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Append wire bytes to `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadOverflow`] if the payload exceeds
    /// [`MAX_PAYLOAD_SIZE`]; `buf` is left untouched in that case.
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), FrameError> {
        let len = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadOverflow(self.payload.len()))?;

        buf.reserve(self.encoded_len());
        buf.push(self.cmd);
        buf.extend_from_slice(&self.dist.ip.to_be_bytes());
        buf.extend_from_slice(&self.dist.port.to_be_bytes());
        buf.extend_from_slice(&self.src.ip.to_be_bytes());
        buf.extend_from_slice(&self.src.port.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Parse wire bytes.
    ///
    /// A payload length larger than the bytes actually present is not an
    /// error: the payload is truncated to what is available.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::TooShort`] if fewer than [`HEADER_SIZE`] bytes
    /// are given.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let u16_at = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);
        let len = u16_at(9) as usize;
        let end = (HEADER_SIZE + len).min(data.len());

        Ok(Self {
            cmd: data[0],
            dist: Address::new(u16_at(1), u16_at(3)),
            src: Address::new(u16_at(5), u16_at(7)),
            payload: data[HEADER_SIZE..end].to_vec(),
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cmd=0x{:02X} {} -> {} len={}",
            self.cmd,
            self.src,
            self.dist,
            self.payload.len()
        )
    }
}

/// Payload of a push-stream-data ack: consumed byte count, big-endian.
#[must_use]
pub fn encode_data_ack(consumed: u16) -> Vec<u8> {
    consumed.to_be_bytes().to_vec()
}

/// Parse the consumed byte count out of a push-stream-data ack payload.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] unless the payload is exactly two bytes.
pub fn decode_data_ack(payload: &[u8]) -> Result<u16, FrameError> {
    match payload {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(FrameError::Malformed(
            format!("data ack payload must be 2 bytes, got {}", payload.len()).into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::new(
            Cmd::PushStreamData.code(),
            Address::new(0x0102, 0x0304),
            Address::new(0x0506, 0x0708),
            b"hello".to_vec(),
        )
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample().encode().unwrap();
        assert_eq!(
            &bytes[..HEADER_SIZE],
            &[0x06, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x00, 0x05]
        );
        assert_eq!(&bytes[HEADER_SIZE..], b"hello");
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_packet_roundtrip() {
        let packet = sample();
        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_packet_too_short() {
        let err = Packet::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: 10
            }
        );
    }

    #[test]
    fn test_truncated_payload() {
        let mut bytes = sample().encode().unwrap();
        bytes.truncate(HEADER_SIZE + 2);
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, b"he");
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = sample().encode().unwrap();
        bytes.extend_from_slice(b"junk");
        assert_eq!(Packet::decode(&bytes).unwrap().payload, b"hello");
    }

    #[test]
    fn test_payload_overflow() {
        let mut packet = sample();
        packet.payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            packet.encode(),
            Err(FrameError::PayloadOverflow(MAX_PAYLOAD_SIZE + 1))
        );

        packet.payload.pop();
        assert_eq!(packet.encode().unwrap().len(), HEADER_SIZE + MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_ack_flag() {
        let packet = Packet::new(Cmd::OpenStream.ack(), Address::default(), Address::default(), vec![]);
        assert!(packet.is_ack());
        assert_eq!(packet.raw_cmd(), 0x02);
        assert_eq!(packet.kind(), Some(Cmd::OpenStream));
    }

    #[test]
    fn test_reply_swaps_addresses() {
        let request = sample();
        let ack = request.reply(Vec::new());
        assert_eq!(ack.cmd, 0x07);
        assert_eq!(ack.dist, request.src);
        assert_eq!(ack.src, request.dist);
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn test_unknown_command() {
        let packet = Packet::new(0x0C, Address::default(), Address::default(), vec![]);
        assert_eq!(packet.kind(), None);
    }

    #[test]
    fn test_data_ack_payload() {
        assert_eq!(encode_data_ack(0x1234), vec![0x12, 0x34]);
        assert_eq!(decode_data_ack(&[0x12, 0x34]).unwrap(), 0x1234);
        assert!(matches!(decode_data_ack(&[]), Err(FrameError::Malformed(_))));
        assert!(matches!(decode_data_ack(&[1, 2, 3]), Err(FrameError::Malformed(_))));
    }
}
