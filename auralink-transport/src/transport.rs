//! Send-queue and receive-loop workers wrapping a [`crate::socket::Socket`].
//!
//! Grounded on `original_source/accessory/src/transport.cpp`: a
//! condition-variable-guarded outbound queue drained by one worker
//! thread, and a polling receive loop (1ms sleep on `WouldBlock`) run
//! by another. `bark/src/socket.rs`'s `ProtocolSocket` contributes the
//! decode-then-dispatch shape.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use auralink_protocol::{Packet, PacketType};

use crate::socket::Socket;

/// Outbound packets are queued under this cap; see the module-level
/// overflow policy in [`enqueue`](SendQueue::enqueue).
pub const SEND_QUEUE_CAPACITY: usize = 256;

const RECEIVE_POLL_SLEEP: Duration = Duration::from_millis(1);
const CONTROL_ENQUEUE_BLOCK: Duration = Duration::from_millis(10);

/// Which overflow policy a queued packet gets when the queue is full.
/// `AUDIO_DATA` is latency-sensitive and unbounded-retry-averse: drop
/// the oldest queued packet rather than the newest. Everything else is
/// control traffic (pairing, keepalive, connect/disconnect) that would
/// rather block briefly than silently reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketClass {
    Audio,
    Control,
}

impl PacketClass {
    pub fn of(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::AudioData | PacketType::AudioAck | PacketType::AudioRetransmit => {
                PacketClass::Audio
            }
            _ => PacketClass::Control,
        }
    }
}

struct QueueEntry {
    packet: Packet,
    /// `None` means "send to whatever peer address has been learned",
    /// used by the accessory side before it has seen its first
    /// datagram from the host.
    addr: Option<SocketAddr>,
    class: PacketClass,
}

struct SendQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl SendQueue {
    fn new() -> Self {
        SendQueue {
            entries: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn enqueue(&self, packet: Packet, addr: Option<SocketAddr>, class: PacketClass) {
        let mut queue = self.entries.lock().unwrap();

        if queue.len() >= SEND_QUEUE_CAPACITY {
            match class {
                PacketClass::Audio => {
                    queue.pop_front();
                    log::warn!("send queue full, dropped oldest queued audio packet");
                }
                PacketClass::Control => {
                    let (guard, timeout) = self
                        .not_full
                        .wait_timeout_while(queue, CONTROL_ENQUEUE_BLOCK, |q| {
                            q.len() >= SEND_QUEUE_CAPACITY
                        })
                        .unwrap();
                    queue = guard;
                    if timeout.timed_out() && queue.len() >= SEND_QUEUE_CAPACITY {
                        log::warn!("send queue full, dropped new control packet");
                        return;
                    }
                }
            }
        }

        queue.push_back(QueueEntry { packet, addr, class });
        self.not_empty.notify_one();
    }
}

#[derive(Default)]
pub struct TransportStats {
    pub packets_sent: AtomicU64,
    pub packets_received: AtomicU64,
    pub decode_errors: AtomicU64,
}

/// A callback invoked on the receive worker's own thread for every
/// decoded packet. Per the design note on callback dispatch, this
/// callback must not block — long work (FSM transitions, buffer
/// insertion) should be cheap or hand off to another thread itself.
pub type PacketCallback = Box<dyn Fn(Packet, SocketAddr) + Send + Sync>;

pub struct Transport {
    socket: Arc<Socket>,
    queue: Arc<SendQueue>,
    /// The peer learned from the first inbound datagram, when
    /// `learn_peer_on_receipt` is set. Used by the accessory, which
    /// does not know its host's address ahead of time.
    learned_peer: Arc<Mutex<Option<SocketAddr>>>,
    learn_peer_on_receipt: bool,
    running: Arc<AtomicBool>,
    pub stats: Arc<TransportStats>,
    send_thread: Option<JoinHandle<()>>,
    receive_thread: Option<JoinHandle<()>>,
}

impl Transport {
    /// `learn_peer_on_receipt` should be `true` on the accessory (the
    /// host address is learned, first-sender-wins) and `false` on the
    /// host (every send specifies an explicit device address).
    pub fn start(
        socket: Socket,
        learn_peer_on_receipt: bool,
        on_packet: PacketCallback,
    ) -> Self {
        let socket = Arc::new(socket);
        let queue = Arc::new(SendQueue::new());
        let learned_peer = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(TransportStats::default());

        let send_thread = {
            let socket = socket.clone();
            let queue = queue.clone();
            let learned_peer = learned_peer.clone();
            let running = running.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name("auralink-send".into())
                .spawn(move || send_loop(socket, queue, learned_peer, running, stats))
                .expect("spawn send thread")
        };

        let receive_thread = {
            let socket = socket.clone();
            let learned_peer = learned_peer.clone();
            let running = running.clone();
            let stats = stats.clone();
            std::thread::Builder::new()
                .name("auralink-recv".into())
                .spawn(move || {
                    receive_loop(
                        socket,
                        learned_peer,
                        learn_peer_on_receipt,
                        running,
                        stats,
                        on_packet,
                    )
                })
                .expect("spawn receive thread")
        };

        Transport {
            socket,
            queue,
            learned_peer,
            learn_peer_on_receipt,
            running,
            stats,
            send_thread: Some(send_thread),
            receive_thread: Some(receive_thread),
        }
    }

    /// Queues `packet` for the learned peer (accessory usage). Silently
    /// dropped if no peer has been learned yet — the reference
    /// implementation does the same, since there is nowhere to send.
    pub fn send(&self, packet: Packet) {
        let class = PacketClass::of(
            packet
                .header
                .packet_type()
                .unwrap_or(auralink_protocol::PacketType::Keepalive),
        );
        self.queue.enqueue(packet, None, class);
    }

    /// Queues `packet` for an explicit address (host usage, one per
    /// known device).
    pub fn send_to(&self, packet: Packet, addr: SocketAddr) {
        let class = PacketClass::of(
            packet
                .header
                .packet_type()
                .unwrap_or(auralink_protocol::PacketType::Keepalive),
        );
        self.queue.enqueue(packet, Some(addr), class);
    }

    pub fn learned_peer(&self) -> Option<SocketAddr> {
        *self.learned_peer.lock().unwrap()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.not_empty.notify_all();
        self.queue.not_full.notify_all();
        if let Some(handle) = self.send_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_loop(
    socket: Arc<Socket>,
    queue: Arc<SendQueue>,
    learned_peer: Arc<Mutex<Option<SocketAddr>>>,
    running: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
) {
    loop {
        let entry = {
            let guard = queue.entries.lock().unwrap();
            let mut guard = queue
                .not_empty
                .wait_while(guard, |q| q.is_empty() && running.load(Ordering::SeqCst))
                .unwrap();
            if !running.load(Ordering::SeqCst) && guard.is_empty() {
                return;
            }
            guard.pop_front()
        };
        queue.not_full.notify_one();

        let Some(entry) = entry else { continue };

        let addr = entry.addr.or_else(|| *learned_peer.lock().unwrap());
        let Some(addr) = addr else {
            // No peer known yet — can't send, matches the reference's
            // "pop and discard" behavior.
            continue;
        };

        let bytes = entry.packet.encode();
        match socket.send_to(&bytes, addr) {
            Ok(_) => {
                stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                log::warn!("send to {addr} failed: {e}");
            }
        }
    }
}

fn receive_loop(
    socket: Arc<Socket>,
    learned_peer: Arc<Mutex<Option<SocketAddr>>>,
    learn_peer_on_receipt: bool,
    running: Arc<AtomicBool>,
    stats: Arc<TransportStats>,
    on_packet: PacketCallback,
) {
    let mut buf = vec![0u8; auralink_protocol::types::MAX_PACKET_SIZE];

    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                if learn_peer_on_receipt {
                    let mut peer = learned_peer.lock().unwrap();
                    if peer.is_none() {
                        log::info!("peer connected: {addr}");
                        *peer = Some(addr);
                    }
                }

                match Packet::decode(&buf[..n]) {
                    Ok(packet) => {
                        stats.packets_received.fetch_add(1, Ordering::Relaxed);
                        on_packet(packet, addr);
                    }
                    Err(e) => {
                        stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                        log::warn!("dropping malformed datagram from {addr}: {e}");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(RECEIVE_POLL_SLEEP);
            }
            Err(e) => {
                log::warn!("recv_from failed: {e}");
                std::thread::sleep(RECEIVE_POLL_SLEEP);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use auralink_protocol::Flags;
    use std::sync::mpsc;

    fn loopback_socket() -> Socket {
        Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap()
    }

    #[test]
    fn packet_class_splits_audio_from_control() {
        assert_eq!(PacketClass::of(PacketType::AudioData), PacketClass::Audio);
        assert_eq!(PacketClass::of(PacketType::Keepalive), PacketClass::Control);
        assert_eq!(PacketClass::of(PacketType::PairRequest), PacketClass::Control);
    }

    #[test]
    fn two_transports_exchange_a_packet() {
        let (tx, rx) = mpsc::channel();

        let host_socket = loopback_socket();
        let host_addr = host_socket.local_addr().unwrap();
        let host = Transport::start(host_socket, false, Box::new(|_, _| {}));

        let acc_socket = loopback_socket();
        let mut acc = Transport::start(
            acc_socket,
            true,
            Box::new(move |packet, addr| {
                tx.send((packet, addr)).unwrap();
            }),
        );

        let packet = Packet::new(PacketType::Keepalive, Flags::empty(), 1, 0, vec![]).unwrap();
        host.send_to(packet.clone(), acc.local_addr().unwrap());

        let (received, _from) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received.header.sequence, 1);
        assert_eq!(acc.learned_peer(), Some(host_addr));

        acc.shutdown();
        drop(host);
    }
}
