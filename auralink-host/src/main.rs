mod config;
mod device_manager;
mod jitter_buffer;

use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use structopt::StructOpt;

use auralink_crypto::SimulatedCrypto;
use auralink_protocol::payload::AudioPayloadHeader;
use auralink_transport::{Socket, Transport};

use device_manager::{DeviceManager, DeviceRecord};
use jitter_buffer::{JitterBuffer, LoggingSink};

fn main() -> ExitCode {
    if let Some(config) = config::read() {
        config::load_into_env(&config);
    }
    auralink_util::logging::init();

    let opt = config::HostOpt::from_args();

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(opt: config::HostOpt) -> Result<(), auralink_transport::BindError> {
    let socket = Socket::bind(opt.bind)?;
    log::info!("host listening on {}", opt.bind);

    let (tx, rx) = mpsc::channel();
    let transport = Arc::new(Transport::start(
        socket,
        false, // host addresses devices explicitly, it never learns a single peer
        Box::new(move |packet, from| {
            let _ = tx.send((packet, from));
        }),
    ));

    let crypto: Arc<dyn auralink_crypto::Crypto + Send + Sync> =
        Arc::new(SimulatedCrypto::insecure_for_testing());

    let jitter_buffer = JitterBuffer::new(Arc::new(LoggingSink));
    jitter_buffer.start();

    // Mirrors the accessory binary's `fsm_cell` trick: the
    // discovered-device callback needs a handle on the
    // `Arc<DeviceManager>` that doesn't exist yet when the callback
    // itself is handed to `DeviceManager::new`.
    let manager_cell: Arc<std::sync::OnceLock<Arc<DeviceManager>>> =
        Arc::new(std::sync::OnceLock::new());

    let auto_connect = opt.auto_connect;
    let discovered_cell = manager_cell.clone();
    let manager = DeviceManager::new(
        transport.clone(),
        crypto,
        Box::new(move |device: DeviceRecord| {
            log::info!("discovered {} ({:02x?})", device.name, device.device_id);
            if auto_connect {
                if let Some(manager) = discovered_cell.get() {
                    manager.pair_device(&device);
                    manager.connect_device(&device);
                }
            }
        }),
        Box::new(|connected| {
            log::info!("connection state: {}", if connected { "connected" } else { "disconnected" });
        }),
    );
    let _ = manager_cell.set(manager.clone());

    manager.start_discovery(opt.discovery_target);

    for (packet, from) in rx {
        dispatch(&manager, &jitter_buffer, packet, from);
    }

    jitter_buffer.stop();
    Ok(())
}

fn dispatch(
    manager: &Arc<DeviceManager>,
    jitter_buffer: &Arc<JitterBuffer>,
    packet: auralink_protocol::Packet,
    from: std::net::SocketAddr,
) {
    use auralink_protocol::PacketType;

    let Some(ty) = packet.header.packet_type() else {
        log::debug!("ignoring packet with unrecognized type {:#04x}", packet.header.type_);
        return;
    };

    match ty {
        PacketType::DiscoverResponse => {
            if let Some(payload) = auralink_protocol::payload::DiscoverPayload::from_bytes(&packet.payload) {
                manager.on_discover_response(&payload, from);
            }
        }
        PacketType::PairResponse => {
            if let Some(payload) = auralink_protocol::payload::PairPayload::from_bytes(&packet.payload) {
                manager.on_pair_response(&payload);
            }
        }
        PacketType::ConnectResponse => manager.on_connect_response(),
        PacketType::Disconnect => manager.on_disconnect(),
        PacketType::AudioData => {
            if let Some(header) = AudioPayloadHeader::from_bytes(&packet.payload) {
                let samples = &packet.payload[auralink_protocol::payload::AUDIO_PAYLOAD_HEADER_SIZE..];
                jitter_buffer.on_audio_packet(packet.header.sequence, &header, samples);
            }
        }
        _ => log::trace!("host has no handler for {ty:?}, ignoring"),
    }
}
