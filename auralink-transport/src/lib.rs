//! Datagram transport: a non-blocking UDP socket plus the bounded
//! send queue and receive loop built on top of it.

pub mod socket;
pub mod transport;

pub use socket::{BindError, Socket};
pub use transport::{PacketCallback, PacketClass, Transport, TransportStats, SEND_QUEUE_CAPACITY};
