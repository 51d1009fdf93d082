//! Packet header encode/decode and the additive-fold checksum.
//!
//! The checksum algorithm here must match
//! `original_source/common/src/protocol.cpp::calculate_checksum` exactly:
//! sum every header byte up to (not including) the checksum field plus
//! every payload byte into a `u32` accumulator, then fold the high 16
//! bits into the low 16 once and truncate to `u16`. It is not iterated
//! to convergence, and it will not detect every corruption — that is
//! the algorithm the two peers agree on, not a claim of strength.

use thiserror::Error;

use crate::types::{Flags, MAX_PACKET_SIZE, PacketType, PROTOCOL_VERSION};

/// `version(2) + type(1) + flags(1) + sequence(4) + timestamp_us(4) +
/// payload_length(2) + checksum(2)`.
pub const HEADER_SIZE: usize = 16;
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Offset of the checksum field within an encoded header. Everything
/// before this offset participates in the checksum; the field itself
/// does not.
const CHECKSUM_OFFSET: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u16,
    pub type_: u8,
    pub flags: u8,
    pub sequence: u32,
    pub timestamp_us: u32,
    pub payload_length: u16,
    pub checksum: u16,
}

impl PacketHeader {
    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u8(self.type_)
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.flags)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("payload of {len} bytes exceeds the {max}-byte maximum")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {len} bytes is shorter than the {HEADER_SIZE}-byte header")]
    TooShort { len: usize },
    #[error("header declares payload_length {declared} exceeding the {max}-byte maximum")]
    PayloadLengthExceedsMax { declared: u16, max: usize },
    #[error("header declares payload_length {declared} but only {available} bytes followed")]
    TruncatedDatagram { declared: u16, available: usize },
    #[error("checksum mismatch: header says {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u16, computed: u16 },
}

fn fold_checksum(sum: u32) -> u16 {
    ((sum & 0xFFFF) + (sum >> 16)) as u16
}

fn checksum_of(header_prefix: &[u8], payload: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for &b in header_prefix {
        sum += b as u32;
    }
    for &b in payload {
        sum += b as u32;
    }
    fold_checksum(sum)
}

impl Packet {
    /// Builds a packet and computes its checksum. Fails if `payload` is
    /// larger than the wire format can carry.
    pub fn new(
        type_: PacketType,
        flags: Flags,
        sequence: u32,
        timestamp_us: u32,
        payload: Vec<u8>,
    ) -> Result<Self, EncodeError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let mut header = PacketHeader {
            version: PROTOCOL_VERSION,
            type_: type_.as_u8(),
            flags: flags.bits(),
            sequence,
            timestamp_us,
            payload_length: payload.len() as u16,
            checksum: 0,
        };
        header.checksum = checksum_of(&header_prefix_bytes(&header), &payload);
        Ok(Packet { header, payload })
    }

    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serializes the packet to its on-wire little-endian byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&header_prefix_bytes(&self.header));
        buf.extend_from_slice(&self.header.checksum.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parses a datagram, validating length and checksum. Does not
    /// reject unrecognized packet types — that dispatch decision
    /// belongs to the caller, not the codec.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::TooShort { len: buf.len() });
        }
        let version = u16::from_le_bytes([buf[0], buf[1]]);
        let type_ = buf[2];
        let flags = buf[3];
        let sequence = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let timestamp_us = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let payload_length = u16::from_le_bytes([buf[12], buf[13]]);
        let checksum = u16::from_le_bytes([buf[14], buf[15]]);

        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadLengthExceedsMax {
                declared: payload_length,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let available = buf.len() - HEADER_SIZE;
        if available < payload_length as usize {
            return Err(DecodeError::TruncatedDatagram {
                declared: payload_length,
                available,
            });
        }
        let payload = buf[HEADER_SIZE..HEADER_SIZE + payload_length as usize].to_vec();

        let computed = checksum_of(&buf[..CHECKSUM_OFFSET], &payload);
        if computed != checksum {
            return Err(DecodeError::ChecksumMismatch {
                expected: checksum,
                computed,
            });
        }

        Ok(Packet {
            header: PacketHeader {
                version,
                type_,
                flags,
                sequence,
                timestamp_us,
                payload_length,
                checksum,
            },
            payload,
        })
    }
}

fn header_prefix_bytes(header: &PacketHeader) -> [u8; CHECKSUM_OFFSET] {
    let mut out = [0u8; CHECKSUM_OFFSET];
    out[0..2].copy_from_slice(&header.version.to_le_bytes());
    out[2] = header.type_;
    out[3] = header.flags;
    out[4..8].copy_from_slice(&header.sequence.to_le_bytes());
    out[8..12].copy_from_slice(&header.timestamp_us.to_le_bytes());
    out[12..14].copy_from_slice(&header.payload_length.to_le_bytes());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(payload: Vec<u8>) -> Packet {
        Packet::new(PacketType::Keepalive, Flags::empty(), 7, 12345, payload).unwrap()
    }

    #[test]
    fn round_trips_empty_payload() {
        let pkt = sample(Vec::new());
        let bytes = pkt.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn round_trips_max_payload() {
        let payload = vec![0xABu8; MAX_PAYLOAD_SIZE];
        let pkt = sample(payload);
        let bytes = pkt.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Packet::new(PacketType::AudioData, Flags::empty(), 0, 0, payload).unwrap_err();
        assert_eq!(
            err,
            EncodeError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE,
            }
        );
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let err = Packet::decode(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert_eq!(err, DecodeError::TooShort { len: HEADER_SIZE - 1 });
    }

    #[test]
    fn decode_rejects_truncated_datagram() {
        let pkt = sample(vec![1, 2, 3, 4]);
        let mut bytes = pkt.encode();
        bytes.truncate(bytes.len() - 1);
        let err = Packet::decode(&bytes).unwrap_err();
        assert_eq!(
            err,
            DecodeError::TruncatedDatagram {
                declared: 4,
                available: 3,
            }
        );
    }

    #[test]
    fn decode_rejects_checksum_mismatch() {
        let pkt = sample(vec![9, 9, 9]);
        let mut bytes = pkt.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn flags_and_type_survive_round_trip() {
        let pkt = Packet::new(
            PacketType::AudioData,
            Flags::ACK_REQUIRED | Flags::PRIORITY,
            42,
            999,
            vec![1, 2, 3],
        )
        .unwrap();
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded.header.packet_type(), Some(PacketType::AudioData));
        assert_eq!(
            decoded.header.flags(),
            Flags::ACK_REQUIRED | Flags::PRIORITY
        );
    }
}
