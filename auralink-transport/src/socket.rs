//! Non-blocking UDP socket wrapper. Grounded on `bark/src/socket.rs`'s
//! `socket2`-based bind/option dance, minus the multicast join — the
//! accessory/host link is unicast (with broadcast enabled for
//! discovery), not multicast.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use socket2::{Domain, Socket as Socket2, Type};
use thiserror::Error;

// Expedited-forwarding DSCP value, requesting switches prioritize
// these packets for minimal delay.
const IPTOS_DSCP_EF: u32 = 0xb8;

#[derive(Debug, Error)]
pub enum BindError {
    #[error("creating socket: {0}")]
    Socket(io::Error),
    #[error("setting SO_REUSEADDR: {0}")]
    SetReuseAddr(io::Error),
    #[error("setting SO_BROADCAST: {0}")]
    SetBroadcast(io::Error),
    #[error("setting non-blocking mode: {0}")]
    SetNonBlocking(io::Error),
    #[error("binding {0}: {1}")]
    Bind(SocketAddr, io::Error),
}

/// A bound, non-blocking UDP socket with broadcast enabled, used by
/// both the accessory (fixed listen port) and the host (ephemeral
/// port, broadcasts `DISCOVER_REQUEST`).
pub struct Socket {
    inner: UdpSocket,
}

impl Socket {
    pub fn bind(addr: SocketAddr) -> Result<Self, BindError> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket2::new(domain, Type::DGRAM, None).map_err(BindError::Socket)?;

        socket.set_reuse_address(true).map_err(BindError::SetReuseAddr)?;
        socket.set_broadcast(true).map_err(BindError::SetBroadcast)?;

        if let Err(e) = socket.set_tos(IPTOS_DSCP_EF) {
            log::warn!("failed to set IPTOS_DSCP_EF: {e:?}");
        }

        socket.bind(&addr.into()).map_err(|e| BindError::Bind(addr, e))?;
        socket.set_nonblocking(true).map_err(BindError::SetNonBlocking)?;

        Ok(Socket { inner: socket.into() })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }

    /// Non-blocking receive. Returns `Err(WouldBlock)` when nothing is
    /// pending; callers poll this in a loop with a short sleep rather
    /// than blocking, matching the reference implementation's
    /// `receive_loop`.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf)
    }
}
