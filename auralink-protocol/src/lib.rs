//! Wire protocol for the accessory/host audio link: packet framing,
//! the additive checksum, and the typed control/audio payloads carried
//! inside a packet. No I/O and no threading here — see
//! `auralink-transport` for the socket layer built on top of this.

pub mod packet;
pub mod payload;
pub mod time;
pub mod types;

pub use packet::{DecodeError, EncodeError, Packet, PacketHeader};
pub use types::{Flags, PacketType};
