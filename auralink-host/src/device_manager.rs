//! Host-side discovery, pairing, and connection tracking.
//!
//! Grounded on `original_source/host/src/device_manager.cpp` 1:1 on
//! semantics: discovery runs on a fixed 2-second period (the host
//! never backs off, unlike the accessory's reconnect policy), pairing
//! always reports success once the request is sent, `connect_device`
//! rejects a second connection attempt while one is active, and an
//! inbound `DISCONNECT` runs the same cleanup as a locally-initiated
//! one minus re-sending the packet that triggered it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use auralink_crypto::Crypto;
use auralink_protocol::payload::{DiscoverPayload, PairPayload};
use auralink_protocol::time::MonotonicMicros;
use auralink_protocol::types::KEEPALIVE_INTERVAL_MS;
use auralink_protocol::{Flags, Packet, PacketType};
use auralink_transport::Transport;

const DISCOVERY_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub name: String,
    pub device_id: [u8; 8],
    pub capabilities: u16,
    pub battery_level: u8,
    pub paired: bool,
    pub connected: bool,
    pub last_seen: MonotonicMicros,
    pub addr: SocketAddr,
}

pub type DeviceDiscoveredCallback = Box<dyn Fn(DeviceRecord) + Send + Sync>;
pub type ConnectionStateCallback = Box<dyn Fn(bool) + Send + Sync>;

pub struct DeviceManager {
    transport: Arc<Transport>,
    crypto: Arc<dyn Crypto + Send + Sync>,
    devices: Mutex<Vec<DeviceRecord>>,
    discovering: AtomicBool,
    discovery_thread: Mutex<Option<JoinHandle<()>>>,
    discovery_target: Mutex<Option<SocketAddr>>,
    connected: AtomicBool,
    connected_device: Mutex<Option<DeviceRecord>>,
    keepalive_running: AtomicBool,
    keepalive_thread: Mutex<Option<JoinHandle<()>>>,
    sequence: AtomicU32,
    on_device_discovered: DeviceDiscoveredCallback,
    on_connection_state: ConnectionStateCallback,
}

impl DeviceManager {
    pub fn new(
        transport: Arc<Transport>,
        crypto: Arc<dyn Crypto + Send + Sync>,
        on_device_discovered: DeviceDiscoveredCallback,
        on_connection_state: ConnectionStateCallback,
    ) -> Arc<Self> {
        Arc::new(DeviceManager {
            transport,
            crypto,
            devices: Mutex::new(Vec::new()),
            discovering: AtomicBool::new(false),
            discovery_thread: Mutex::new(None),
            discovery_target: Mutex::new(None),
            connected: AtomicBool::new(false),
            connected_device: Mutex::new(None),
            keepalive_running: AtomicBool::new(false),
            keepalive_thread: Mutex::new(None),
            sequence: AtomicU32::new(0),
            on_device_discovered,
            on_connection_state,
        })
    }

    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.lock().unwrap().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Starts broadcasting `DISCOVER_REQUEST` to `target` every 2
    /// seconds. Clears any previously discovered devices.
    pub fn start_discovery(self: &Arc<Self>, target: SocketAddr) {
        if self.discovering.swap(true, Ordering::SeqCst) {
            return;
        }
        self.devices.lock().unwrap().clear();
        *self.discovery_target.lock().unwrap() = Some(target);

        let manager = self.clone();
        let handle = std::thread::Builder::new()
            .name("auralink-discovery".into())
            .spawn(move || manager.discovery_loop())
            .expect("spawn discovery thread");
        *self.discovery_thread.lock().unwrap() = Some(handle);
    }

    pub fn stop_discovery(&self) {
        if !self.discovering.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.discovery_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn discovery_loop(&self) {
        while self.discovering.load(Ordering::SeqCst) {
            self.send_discover_request();
            std::thread::sleep(DISCOVERY_PERIOD);
        }
    }

    fn send_discover_request(&self) {
        let Some(target) = *self.discovery_target.lock().unwrap() else {
            return;
        };
        self.send(PacketType::DiscoverRequest, Vec::new(), target);
    }

    pub fn on_discover_response(&self, payload: &DiscoverPayload, from: SocketAddr) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(existing) = devices.iter_mut().find(|d| d.device_id == payload.device_id) {
            existing.last_seen = auralink_util::time::now();
            existing.addr = from;
            return;
        }

        let record = DeviceRecord {
            name: payload.device_name.clone(),
            device_id: payload.device_id,
            capabilities: payload.capabilities,
            battery_level: payload.battery_level,
            paired: false,
            connected: false,
            last_seen: auralink_util::time::now(),
            addr: from,
        };
        devices.push(record.clone());
        drop(devices);
        (self.on_device_discovered)(record);
    }

    /// Sends a `PAIR_REQUEST` and reports success unconditionally,
    /// matching the reference — pairing here is a fire-and-forget
    /// handshake kickoff, not a synchronous round trip.
    pub fn pair_device(&self, device: &DeviceRecord) -> bool {
        let keypair = self.crypto.generate_keypair();
        let nonce_bytes = self.crypto.random_bytes(16);
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&nonce_bytes);

        let payload = PairPayload {
            device_id: device.device_id,
            public_key: keypair.public_key,
            nonce,
        };
        self.send(PacketType::PairRequest, payload.to_bytes(), device.addr);
        true
    }

    pub fn on_pair_response(&self, payload: &PairPayload) {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.iter_mut().find(|d| d.device_id == payload.device_id) {
            device.paired = true;
        }
    }

    /// Rejects if already connected to a device — the reference does
    /// not support concurrent connections.
    pub fn connect_device(self: &Arc<Self>, device: &DeviceRecord) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            return false;
        }
        *self.connected_device.lock().unwrap() = Some(device.clone());
        self.send(PacketType::ConnectRequest, Vec::new(), device.addr);
        true
    }

    pub fn on_connect_response(self: &Arc<Self>) {
        self.connected.store(true, Ordering::SeqCst);
        if let Some(device) = self.connected_device.lock().unwrap().as_mut() {
            device.connected = true;
        }
        self.start_keepalive();
        (self.on_connection_state)(true);
    }

    /// Locally initiated disconnect: sends `DISCONNECT` then tears
    /// down. No-ops if not connected.
    pub fn disconnect_device(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.stop_keepalive();
        if let Some(addr) = self.connected_device.lock().unwrap().as_ref().map(|d| d.addr) {
            self.send(PacketType::Disconnect, Vec::new(), addr);
        }
        self.connected.store(false, Ordering::SeqCst);
        (self.on_connection_state)(false);
        true
    }

    /// Peer-initiated disconnect: same cleanup, but we don't re-send
    /// the packet that told us about it.
    pub fn on_disconnect(&self) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        self.stop_keepalive();
        self.connected.store(false, Ordering::SeqCst);
        (self.on_connection_state)(false);
    }

    fn start_keepalive(self: &Arc<Self>) {
        if self.keepalive_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = self.clone();
        let handle = std::thread::Builder::new()
            .name("auralink-host-keepalive".into())
            .spawn(move || manager.keepalive_loop())
            .expect("spawn keepalive thread");
        *self.keepalive_thread.lock().unwrap() = Some(handle);
    }

    fn stop_keepalive(&self) {
        if !self.keepalive_running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.keepalive_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn keepalive_loop(&self) {
        while self.keepalive_running.load(Ordering::SeqCst) {
            if let Some(addr) = self.connected_device.lock().unwrap().as_ref().map(|d| d.addr) {
                self.send(PacketType::Keepalive, Vec::new(), addr);
            }
            std::thread::sleep(Duration::from_millis(KEEPALIVE_INTERVAL_MS));
        }
    }

    fn send(&self, ty: PacketType, payload: Vec<u8>, to: SocketAddr) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let timestamp = auralink_util::time::now().0 as u32;
        match Packet::new(ty, Flags::empty(), sequence, timestamp, payload) {
            Ok(packet) => self.transport.send_to(packet, to),
            Err(e) => log::warn!("failed to build {ty:?} packet: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use auralink_crypto::SimulatedCrypto;
    use auralink_transport::Socket;
    use std::sync::Mutex as StdMutex;

    fn test_manager() -> (Arc<DeviceManager>, Arc<StdMutex<Vec<DeviceRecord>>>, Arc<StdMutex<Vec<bool>>>) {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let transport = Arc::new(Transport::start(socket, false, Box::new(|_, _| {})));
        let discovered = Arc::new(StdMutex::new(Vec::new()));
        let connection_states = Arc::new(StdMutex::new(Vec::new()));
        let d = discovered.clone();
        let c = connection_states.clone();
        let manager = DeviceManager::new(
            transport,
            Arc::new(SimulatedCrypto::insecure_for_testing()),
            Box::new(move |dev| d.lock().unwrap().push(dev)),
            Box::new(move |connected| c.lock().unwrap().push(connected)),
        );
        (manager, discovered, connection_states)
    }

    fn sample_discover_payload(id: [u8; 8]) -> DiscoverPayload {
        DiscoverPayload {
            device_name: "Auralink-TEST".into(),
            device_id: id,
            capabilities: 1,
            battery_level: 90,
        }
    }

    #[test]
    fn discover_response_adds_new_device_once() {
        let (manager, discovered, _) = test_manager();
        let addr: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        let payload = sample_discover_payload([1; 8]);

        manager.on_discover_response(&payload, addr);
        manager.on_discover_response(&payload, addr);

        assert_eq!(manager.devices().len(), 1);
        assert_eq!(discovered.lock().unwrap().len(), 1);
    }

    #[test]
    fn repeated_discover_response_updates_last_seen_not_duplicate() {
        let (manager, _, _) = test_manager();
        let addr: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        manager.on_discover_response(&sample_discover_payload([2; 8]), addr);
        let first_seen = manager.devices()[0].last_seen;

        std::thread::sleep(Duration::from_millis(2));
        manager.on_discover_response(&sample_discover_payload([2; 8]), addr);
        let second_seen = manager.devices()[0].last_seen;

        assert_eq!(manager.devices().len(), 1);
        assert!(second_seen.0 >= first_seen.0);
    }

    #[test]
    fn connect_device_rejects_when_already_connected() {
        let (manager, _, _) = test_manager();
        let addr: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        manager.on_discover_response(&sample_discover_payload([3; 8]), addr);
        let device = manager.devices().remove(0);

        assert!(manager.connect_device(&device));
        manager.on_connect_response();
        assert!(!manager.connect_device(&device));
    }

    #[test]
    fn disconnect_is_a_no_op_when_not_connected() {
        let (manager, _, connection_states) = test_manager();
        assert!(!manager.disconnect_device());
        assert!(connection_states.lock().unwrap().is_empty());
    }

    #[test]
    fn connect_then_disconnect_fires_connection_state_callback_both_ways() {
        let (manager, _, connection_states) = test_manager();
        let addr: SocketAddr = "127.0.0.1:1111".parse().unwrap();
        manager.on_discover_response(&sample_discover_payload([4; 8]), addr);
        let device = manager.devices().remove(0);

        manager.connect_device(&device);
        manager.on_connect_response();
        assert!(manager.disconnect_device());

        assert_eq!(connection_states.lock().unwrap().as_slice(), &[true, false]);
    }
}
