//! Typed payload structs carried inside a [`crate::packet::Packet`].
//!
//! Layouts match `original_source/common/include/protocol.h` field for
//! field. Each payload owns its encode/decode pair rather than
//! implementing a shared trait — the set is closed and small enough
//! that a trait would just be indirection.

/// `device_name[32] + device_id[8] + capabilities(2) + battery_level(1)`.
pub const DISCOVER_PAYLOAD_SIZE: usize = 32 + 8 + 2 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverPayload {
    pub device_name: String,
    pub device_id: [u8; 8],
    pub capabilities: u16,
    pub battery_level: u8,
}

impl DiscoverPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DISCOVER_PAYLOAD_SIZE);
        buf.extend_from_slice(&encode_fixed_str::<32>(&self.device_name));
        buf.extend_from_slice(&self.device_id);
        buf.extend_from_slice(&self.capabilities.to_le_bytes());
        buf.push(self.battery_level);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < DISCOVER_PAYLOAD_SIZE {
            return None;
        }
        let device_name = decode_fixed_str(&buf[0..32]);
        let mut device_id = [0u8; 8];
        device_id.copy_from_slice(&buf[32..40]);
        let capabilities = u16::from_le_bytes([buf[40], buf[41]]);
        let battery_level = buf[42];
        Some(Self {
            device_name,
            device_id,
            capabilities,
            battery_level,
        })
    }
}

/// `device_id[8] + public_key[32] + nonce[16]`.
pub const PAIR_PAYLOAD_SIZE: usize = 8 + 32 + 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPayload {
    pub device_id: [u8; 8],
    pub public_key: [u8; 32],
    pub nonce: [u8; 16],
}

impl PairPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAIR_PAYLOAD_SIZE);
        buf.extend_from_slice(&self.device_id);
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < PAIR_PAYLOAD_SIZE {
            return None;
        }
        let mut device_id = [0u8; 8];
        device_id.copy_from_slice(&buf[0..8]);
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&buf[8..40]);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&buf[40..56]);
        Some(Self {
            device_id,
            public_key,
            nonce,
        })
    }
}

/// `stream_timestamp(4) + sample_count(2) + encoding(1) + reserved(1)`.
/// This is the header that precedes raw PCM16 samples inside an
/// `AUDIO_DATA` packet's payload; the samples themselves follow it
/// directly and are not modeled as a struct field.
pub const AUDIO_PAYLOAD_HEADER_SIZE: usize = 4 + 2 + 1 + 1;

/// `encoding` byte: raw 16-bit PCM, no compression.
pub const AUDIO_ENCODING_PCM16: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPayloadHeader {
    pub stream_timestamp: u32,
    pub sample_count: u16,
    pub encoding: u8,
    pub reserved: u8,
}

impl AudioPayloadHeader {
    pub fn to_bytes(&self) -> [u8; AUDIO_PAYLOAD_HEADER_SIZE] {
        let mut buf = [0u8; AUDIO_PAYLOAD_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.stream_timestamp.to_le_bytes());
        buf[4..6].copy_from_slice(&self.sample_count.to_le_bytes());
        buf[6] = self.encoding;
        buf[7] = self.reserved;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < AUDIO_PAYLOAD_HEADER_SIZE {
            return None;
        }
        Some(Self {
            stream_timestamp: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            sample_count: u16::from_le_bytes([buf[4], buf[5]]),
            encoding: buf[6],
            reserved: buf[7],
        })
    }
}

/// `level(1) + charging(1) + voltage_mv(2) + current_ma(2) +
/// temperature_c(2) + time_remaining_s(4)`.
pub const BATTERY_PAYLOAD_SIZE: usize = 1 + 1 + 2 + 2 + 2 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryPayload {
    pub level: u8,
    pub charging: bool,
    pub voltage_mv: u16,
    pub current_ma: i16,
    /// Tenths of a degree Celsius, e.g. `250` is 25.0C.
    pub temperature_c: u16,
    pub time_remaining_s: u32,
}

impl BatteryPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BATTERY_PAYLOAD_SIZE);
        buf.push(self.level);
        buf.push(self.charging as u8);
        buf.extend_from_slice(&self.voltage_mv.to_le_bytes());
        buf.extend_from_slice(&self.current_ma.to_le_bytes());
        buf.extend_from_slice(&self.temperature_c.to_le_bytes());
        buf.extend_from_slice(&self.time_remaining_s.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < BATTERY_PAYLOAD_SIZE {
            return None;
        }
        Some(Self {
            level: buf[0],
            charging: buf[1] != 0,
            voltage_mv: u16::from_le_bytes([buf[2], buf[3]]),
            current_ma: i16::from_le_bytes([buf[4], buf[5]]),
            temperature_c: u16::from_le_bytes([buf[6], buf[7]]),
            time_remaining_s: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Four `u32` counters, a `u32` CRC-error count, an `i8` RSSI, a `u8`
/// link quality, and two `u16` latency fields.
pub const DIAGNOSTICS_PAYLOAD_SIZE: usize = 4 * 5 + 1 + 1 + 2 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiagnosticsPayload {
    pub packets_sent: u32,
    pub packets_received: u32,
    pub packets_lost: u32,
    pub packets_retransmitted: u32,
    pub crc_errors: u32,
    pub rssi_dbm: i8,
    pub link_quality: u8,
    pub avg_latency_us: u16,
    pub max_latency_us: u16,
}

impl DiagnosticsPayload {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(DIAGNOSTICS_PAYLOAD_SIZE);
        buf.extend_from_slice(&self.packets_sent.to_le_bytes());
        buf.extend_from_slice(&self.packets_received.to_le_bytes());
        buf.extend_from_slice(&self.packets_lost.to_le_bytes());
        buf.extend_from_slice(&self.packets_retransmitted.to_le_bytes());
        buf.extend_from_slice(&self.crc_errors.to_le_bytes());
        buf.push(self.rssi_dbm as u8);
        buf.push(self.link_quality);
        buf.extend_from_slice(&self.avg_latency_us.to_le_bytes());
        buf.extend_from_slice(&self.max_latency_us.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < DIAGNOSTICS_PAYLOAD_SIZE {
            return None;
        }
        Some(Self {
            packets_sent: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            packets_received: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            packets_lost: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            packets_retransmitted: u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]),
            crc_errors: u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]),
            rssi_dbm: buf[20] as i8,
            link_quality: buf[21],
            avg_latency_us: u16::from_le_bytes([buf[22], buf[23]]),
            max_latency_us: u16::from_le_bytes([buf[24], buf[25]]),
        })
    }
}

fn encode_fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

fn decode_fixed_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn discover_payload_round_trips() {
        let p = DiscoverPayload {
            device_name: "AudioSim-AB12".to_string(),
            device_id: [1, 2, 3, 4, 5, 6, 7, 8],
            capabilities: 0x0001,
            battery_level: 85,
        };
        let bytes = p.to_bytes();
        assert_eq!(bytes.len(), DISCOVER_PAYLOAD_SIZE);
        assert_eq!(DiscoverPayload::from_bytes(&bytes).unwrap(), p);
    }

    #[test]
    fn device_name_truncates_past_31_bytes() {
        let long = "x".repeat(64);
        let p = DiscoverPayload {
            device_name: long,
            device_id: [0; 8],
            capabilities: 0,
            battery_level: 0,
        };
        let decoded = DiscoverPayload::from_bytes(&p.to_bytes()).unwrap();
        assert_eq!(decoded.device_name.len(), 32);
    }

    #[test]
    fn audio_payload_header_round_trips() {
        let h = AudioPayloadHeader {
            stream_timestamp: 123_456,
            sample_count: 480,
            encoding: AUDIO_ENCODING_PCM16,
            reserved: 0,
        };
        assert_eq!(AudioPayloadHeader::from_bytes(&h.to_bytes()).unwrap(), h);
    }

    #[test]
    fn battery_payload_round_trips() {
        let b = BatteryPayload {
            level: 42,
            charging: true,
            voltage_mv: 4100,
            current_ma: -150,
            temperature_c: 253,
            time_remaining_s: 9000,
        };
        assert_eq!(BatteryPayload::from_bytes(&b.to_bytes()).unwrap(), b);
    }

    #[test]
    fn diagnostics_payload_round_trips() {
        let d = DiagnosticsPayload {
            packets_sent: 1000,
            packets_received: 990,
            packets_lost: 10,
            packets_retransmitted: 2,
            crc_errors: 1,
            rssi_dbm: -62,
            link_quality: 80,
            avg_latency_us: 2500,
            max_latency_us: 9000,
        };
        assert_eq!(DiagnosticsPayload::from_bytes(&d.to_bytes()).unwrap(), d);
    }

    #[test]
    fn from_bytes_rejects_short_buffers() {
        assert!(DiscoverPayload::from_bytes(&[0u8; 10]).is_none());
        assert!(PairPayload::from_bytes(&[0u8; 10]).is_none());
        assert!(BatteryPayload::from_bytes(&[0u8; 2]).is_none());
        assert!(DiagnosticsPayload::from_bytes(&[0u8; 2]).is_none());
    }
}
