//! Wire-level type codes, flag bits, and the protocol's fixed constants.
//!
//! Values here must match `original_source/common/include/protocol.h`
//! bit-for-bit; this is the contract both peers compile against.

use bitflags::bitflags;

/// Current protocol version, sent in every packet header.
pub const PROTOCOL_VERSION: u16 = 0x0100;

pub const MAX_PACKET_SIZE: usize = 2048;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const ENCRYPTED    = 0x01;
        const PRIORITY     = 0x02;
        const ACK_REQUIRED = 0x04;
        const RETRANSMIT   = 0x08;
    }
}

/// Packet type codes (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    DiscoverRequest = 0x01,
    DiscoverResponse = 0x02,
    PairRequest = 0x10,
    PairResponse = 0x11,
    ConnectRequest = 0x12,
    ConnectResponse = 0x13,
    Disconnect = 0x14,
    Keepalive = 0x15,
    AudioData = 0x20,
    AudioAck = 0x21,
    AudioRetransmit = 0x22,
    BatteryStatus = 0x30,
    Diagnostics = 0x31,
    KeyExchange = 0x40,
    EncryptedPacket = 0x41,
}

impl PacketType {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0x01 => Self::DiscoverRequest,
            0x02 => Self::DiscoverResponse,
            0x10 => Self::PairRequest,
            0x11 => Self::PairResponse,
            0x12 => Self::ConnectRequest,
            0x13 => Self::ConnectResponse,
            0x14 => Self::Disconnect,
            0x15 => Self::Keepalive,
            0x20 => Self::AudioData,
            0x21 => Self::AudioAck,
            0x22 => Self::AudioRetransmit,
            0x30 => Self::BatteryStatus,
            0x31 => Self::Diagnostics,
            0x40 => Self::KeyExchange,
            0x41 => Self::EncryptedPacket,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Audio constants (§6). Sample rate, packetization cadence, and the
/// derived per-packet byte size.
pub const AUDIO_SAMPLE_RATE: u32 = 48_000;
pub const AUDIO_PACKET_DURATION_MS: u64 = 10;
pub const AUDIO_SAMPLES_PER_PACKET: u16 =
    ((AUDIO_SAMPLE_RATE as u64 * AUDIO_PACKET_DURATION_MS) / 1000) as u16;
pub const AUDIO_BYTES_PER_SAMPLE: u16 = 2;
pub const AUDIO_PACKET_SIZE: u16 = AUDIO_SAMPLES_PER_PACKET * AUDIO_BYTES_PER_SAMPLE;

pub const TARGET_LATENCY_MS: u16 = 30;
pub const MAX_LATENCY_MS: u16 = 50;

pub const MIN_JITTER_BUFFER_PACKETS: u8 = 2;
pub const DEFAULT_JITTER_BUFFER_PACKETS: u8 = 3;
pub const MAX_JITTER_BUFFER_PACKETS: u8 = 4;

pub const KEEPALIVE_INTERVAL_MS: u64 = 1000;
pub const CONNECTION_TIMEOUT_MS: u64 = 5000;
pub const RECONNECT_BASE_DELAY_MS: u64 = 100;
pub const RECONNECT_MAX_DELAY_MS: u64 = 5000;

/// Default UDP port the accessory listens on.
pub const DEFAULT_ACCESSORY_PORT: u16 = 8888;

/// Accessory-side connection lifecycle state (§3). Never appears on
/// the wire itself; it's what the FSM transitions between in response
/// to inbound packets and local events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Idle = 0x00,
    Discovering = 0x01,
    Pairing = 0x02,
    Connected = 0x03,
    Streaming = 0x04,
    Disconnecting = 0x05,
    Error = 0xFF,
}

impl ConnectionState {
    /// True for the states in which the accessory is considered
    /// reachable by its paired host — the keepalive watcher only
    /// fires connection-loss handling while this holds.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn audio_packet_size_matches_spec() {
        assert_eq!(AUDIO_SAMPLES_PER_PACKET, 480);
        assert_eq!(AUDIO_PACKET_SIZE, 960);
    }

    #[test]
    fn packet_type_round_trips() {
        for byte in [0x01, 0x02, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15,
                     0x20, 0x21, 0x22, 0x30, 0x31, 0x40, 0x41] {
            let ty = PacketType::from_u8(byte).expect("known type code");
            assert_eq!(ty.as_u8(), byte);
        }
        assert!(PacketType::from_u8(0xEE).is_none());
    }
}
