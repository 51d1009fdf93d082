//! The accessory's connection state machine.
//!
//! Grounded on `original_source/accessory/src/connection_fsm.cpp`:
//! mutex-guarded state with a no-op on self-transition, a single
//! `(old, new)` callback fired outside the lock, and the event
//! handlers below in the same order and with the same side effects
//! the reference implementation has (e.g. `on_connect_request` sends
//! its response *before* transitioning to `Connected`, and resets the
//! reconnect policy in that same step).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use auralink_crypto::Crypto;
use auralink_protocol::payload::{DiscoverPayload, PairPayload};
use auralink_protocol::time::MonotonicMicros;
use auralink_protocol::types::{ConnectionState, CONNECTION_TIMEOUT_MS, KEEPALIVE_INTERVAL_MS};
use auralink_protocol::{Flags, Packet, PacketType};
use auralink_transport::Transport;

use crate::reconnect::ReconnectPolicy;

/// Fixed capability bitmask advertised in discover responses: bit 0 is
/// "supports streaming audio," the only capability this accessory has.
const CAPABILITIES: u16 = 0x0001;

/// Battery level baked into discover responses, matching the
/// reference's hardcoded `85` — the telemetry module tracks its own,
/// separately draining battery level for `BATTERY_STATUS` reports.
const DISCOVER_BATTERY_LEVEL: u8 = 85;

pub type StateChangeCallback = Box<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

pub struct ConnectionFsm {
    state: Mutex<ConnectionState>,
    device_id: [u8; 8],
    device_name: String,
    sequence: AtomicU32,
    last_keepalive: Mutex<MonotonicMicros>,
    reconnect: Mutex<ReconnectPolicy>,
    transport: Arc<Transport>,
    crypto: Arc<dyn Crypto + Send + Sync>,
    on_state_change: StateChangeCallback,
    running: AtomicBool,
    keepalive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionFsm {
    pub fn new(
        device_id: [u8; 8],
        transport: Arc<Transport>,
        crypto: Arc<dyn Crypto + Send + Sync>,
        on_state_change: StateChangeCallback,
    ) -> Arc<Self> {
        let device_name = format!("Auralink-{:02X}{:02X}", device_id[0], device_id[1]);
        Arc::new(ConnectionFsm {
            state: Mutex::new(ConnectionState::Idle),
            device_id,
            device_name,
            sequence: AtomicU32::new(0),
            last_keepalive: Mutex::new(now()),
            reconnect: Mutex::new(ReconnectPolicy::new()),
            transport,
            crypto,
            on_state_change,
            running: AtomicBool::new(true),
            keepalive_thread: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub fn device_id(&self) -> [u8; 8] {
        self.device_id
    }

    /// Starts the keepalive liveness watcher. Call once, after
    /// construction.
    pub fn start(self: &Arc<Self>) {
        let fsm = self.clone();
        let handle = std::thread::Builder::new()
            .name("auralink-keepalive".into())
            .spawn(move || fsm.keepalive_loop())
            .expect("spawn keepalive thread");
        *self.keepalive_thread.lock().unwrap() = Some(handle);
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.keepalive_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Dispatches one inbound packet to the matching handler. Runs on
    /// the transport's receive thread, so handlers here must stay
    /// cheap — see the design note on callback dispatch.
    pub fn dispatch(&self, packet: Packet, from: SocketAddr) {
        let Some(ty) = packet.header.packet_type() else {
            log::debug!("ignoring packet with unrecognized type {:#04x}", packet.header.type_);
            return;
        };

        match ty {
            PacketType::DiscoverRequest => self.on_discover_request(from),
            PacketType::PairRequest => self.on_pair_request(from),
            PacketType::ConnectRequest => self.on_connect_request(from),
            PacketType::Disconnect => self.on_disconnect(from),
            PacketType::Keepalive => self.on_keepalive(from),
            _ => log::trace!("fsm has no handler for {ty:?}, ignoring"),
        }
    }

    fn on_discover_request(&self, from: SocketAddr) {
        self.transition(ConnectionState::Discovering);

        let payload = DiscoverPayload {
            device_name: self.device_name.clone(),
            device_id: self.device_id,
            capabilities: CAPABILITIES,
            battery_level: DISCOVER_BATTERY_LEVEL,
        };
        self.send_control(PacketType::DiscoverResponse, Flags::empty(), payload.to_bytes(), from);
    }

    fn on_pair_request(&self, from: SocketAddr) {
        self.transition(ConnectionState::Pairing);

        let keypair = self.crypto.generate_keypair();
        let nonce_bytes = self.crypto.random_bytes(16);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&nonce_bytes);

        let payload = PairPayload {
            device_id: self.device_id,
            public_key: keypair.public_key,
            nonce,
        };
        self.send_control(PacketType::PairResponse, Flags::empty(), payload.to_bytes(), from);
    }

    fn on_connect_request(&self, from: SocketAddr) {
        // Reference sends the response before flipping state and
        // resetting the reconnect policy — keep that order.
        self.send_control(PacketType::ConnectResponse, Flags::empty(), Vec::new(), from);
        self.transition(ConnectionState::Connected);
        self.reconnect.lock().unwrap().reset();
    }

    fn on_disconnect(&self, _from: SocketAddr) {
        self.transition(ConnectionState::Disconnecting);
        std::thread::sleep(Duration::from_millis(100));
        self.transition(ConnectionState::Idle);
    }

    fn on_keepalive(&self, from: SocketAddr) {
        *self.last_keepalive.lock().unwrap() = now();
        self.send_control(PacketType::Keepalive, Flags::empty(), Vec::new(), from);
    }

    /// Promotes `Connected` to `Streaming` once the caller (normally
    /// the binary's `state_change` wiring, half a second after
    /// entering `Connected`) decides audio should start flowing. A
    /// no-op if the accessory isn't `Connected` anymore by then.
    pub fn enter_streaming(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != ConnectionState::Connected {
            return false;
        }
        *state = ConnectionState::Streaming;
        drop(state);
        log::info!("{:?} -> {:?}", ConnectionState::Connected, ConnectionState::Streaming);
        (self.on_state_change)(ConnectionState::Connected, ConnectionState::Streaming);
        true
    }

    /// Invoked by the keepalive watcher on liveness timeout, or by a
    /// transport layer that detects the peer is unreachable.
    pub fn handle_connection_loss(&self) {
        self.transition(ConnectionState::Error);
        self.attempt_reconnection();
    }

    fn attempt_reconnection(&self) {
        let (attempt, delay) = self.reconnect.lock().unwrap().attempt();
        log::warn!("reconnect attempt {attempt}, waiting {}ms", delay.as_millis());
        std::thread::sleep(delay);
        self.transition(ConnectionState::Idle);
    }

    fn transition(&self, new: ConnectionState) {
        let old = {
            let mut state = self.state.lock().unwrap();
            if *state == new {
                return;
            }
            let old = *state;
            *state = new;
            old
        };
        log::info!("{:?} -> {:?}", old, new);
        (self.on_state_change)(old, new);
    }

    fn send_control(&self, ty: PacketType, flags: Flags, payload: Vec<u8>, to: SocketAddr) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        match Packet::new(ty, flags, sequence, now().0 as u32, payload) {
            Ok(packet) => self.transport.send_to(packet, to),
            Err(e) => log::warn!("failed to build {ty:?} packet: {e}"),
        }
    }

    fn keepalive_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(KEEPALIVE_INTERVAL_MS));

            if !self.state().is_connected() {
                continue;
            }

            let elapsed_ms = (now() - *self.last_keepalive.lock().unwrap()) / 1000;
            if elapsed_ms > CONNECTION_TIMEOUT_MS {
                log::warn!("keepalive timeout after {elapsed_ms}ms, declaring connection lost");
                self.handle_connection_loss();
            }
        }
    }
}

fn now() -> MonotonicMicros {
    auralink_util::time::now()
}

#[cfg(test)]
mod test {
    use super::*;
    use auralink_crypto::SimulatedCrypto;
    use auralink_transport::Socket;
    use std::sync::Mutex as StdMutex;

    fn test_transport() -> Arc<Transport> {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        Arc::new(Transport::start(socket, true, Box::new(|_, _| {})))
    }

    fn test_fsm() -> (Arc<ConnectionFsm>, Arc<StdMutex<Vec<(ConnectionState, ConnectionState)>>>) {
        let transitions = Arc::new(StdMutex::new(Vec::new()));
        let recorded = transitions.clone();
        let fsm = ConnectionFsm::new(
            [1, 2, 3, 4, 5, 6, 7, 8],
            test_transport(),
            Arc::new(SimulatedCrypto::insecure_for_testing()),
            Box::new(move |old, new| recorded.lock().unwrap().push((old, new))),
        );
        (fsm, transitions)
    }

    #[test]
    fn starts_idle() {
        let (fsm, _) = test_fsm();
        assert_eq!(fsm.state(), ConnectionState::Idle);
    }

    #[test]
    fn discover_request_transitions_to_discovering() {
        let (fsm, transitions) = test_fsm();
        fsm.on_discover_request("127.0.0.1:9".parse().unwrap());
        assert_eq!(fsm.state(), ConnectionState::Discovering);
        assert_eq!(
            transitions.lock().unwrap().as_slice(),
            &[(ConnectionState::Idle, ConnectionState::Discovering)]
        );
    }

    #[test]
    fn self_transition_is_a_no_op() {
        let (fsm, transitions) = test_fsm();
        fsm.on_discover_request("127.0.0.1:9".parse().unwrap());
        fsm.on_discover_request("127.0.0.1:9".parse().unwrap());
        assert_eq!(transitions.lock().unwrap().len(), 1);
    }

    #[test]
    fn connect_request_resets_reconnect_policy() {
        let (fsm, _) = test_fsm();
        fsm.reconnect.lock().unwrap().attempt();
        fsm.reconnect.lock().unwrap().attempt();
        fsm.on_connect_request("127.0.0.1:9".parse().unwrap());
        assert_eq!(fsm.state(), ConnectionState::Connected);
        assert_eq!(fsm.reconnect.lock().unwrap().attempts(), 0);
    }

    #[test]
    fn disconnect_passes_through_disconnecting_to_idle() {
        let (fsm, _) = test_fsm();
        fsm.on_connect_request("127.0.0.1:9".parse().unwrap());
        fsm.on_disconnect("127.0.0.1:9".parse().unwrap());
        assert_eq!(fsm.state(), ConnectionState::Idle);
    }

    #[test]
    fn connection_loss_enters_error_then_idle_after_backoff() {
        let (fsm, transitions) = test_fsm();
        fsm.on_connect_request("127.0.0.1:9".parse().unwrap());
        fsm.handle_connection_loss();
        assert_eq!(fsm.state(), ConnectionState::Idle);
        let log = transitions.lock().unwrap();
        assert!(log.contains(&(ConnectionState::Connected, ConnectionState::Error)));
        assert!(log.contains(&(ConnectionState::Error, ConnectionState::Idle)));
    }
}
