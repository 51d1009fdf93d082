mod config;
mod fsm;
mod pacer;
mod reconnect;
mod telemetry;

use std::process::ExitCode;
use std::sync::mpsc;
use std::sync::Arc;

use structopt::StructOpt;

use auralink_crypto::SimulatedCrypto;
use auralink_protocol::types::ConnectionState;
use auralink_transport::{Socket, Transport};

use fsm::ConnectionFsm;
use pacer::AudioPacer;
use telemetry::Telemetry;

/// Delay between entering `Connected` and promoting to `Streaming`,
/// giving the host a moment to finish its own connect-side setup
/// before audio starts flowing. Matches the reference's 500ms pause.
const STREAM_START_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

fn main() -> ExitCode {
    if let Some(config) = config::read() {
        config::load_into_env(&config);
    }
    auralink_util::logging::init();

    let opt = config::AccessoryOpt::from_args();

    match run(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(opt: config::AccessoryOpt) -> Result<(), auralink_transport::BindError> {
    let socket = Socket::bind(opt.bind)?;
    log::info!("accessory listening on {}", opt.bind);

    let (tx, rx) = mpsc::channel();
    let transport = Arc::new(Transport::start(
        socket,
        true, // first-sender-wins peer learning
        Box::new(move |packet, from| {
            let _ = tx.send((packet, from));
        }),
    ));

    let device_id: [u8; 8] = rand::random();
    let crypto: Arc<dyn auralink_crypto::Crypto + Send + Sync> =
        Arc::new(SimulatedCrypto::insecure_for_testing());

    let pacer = AudioPacer::new(transport.clone());
    let telemetry = Telemetry::new(transport.clone());

    // `fsm` is constructed below and captured by this `Weak` so the
    // state-change callback can reach back into it without a
    // construction-order cycle (the callback itself is handed to
    // `ConnectionFsm::new`, before the `Arc<ConnectionFsm>` exists).
    let fsm_cell: Arc<std::sync::OnceLock<Arc<ConnectionFsm>>> = Arc::new(std::sync::OnceLock::new());

    let fsm_pacer = pacer.clone();
    let fsm_telemetry = telemetry.clone();
    let callback_cell = fsm_cell.clone();
    let fsm = ConnectionFsm::new(
        device_id,
        transport.clone(),
        crypto,
        Box::new(move |old, new| {
            let _ = old;

            if new == ConnectionState::Connected {
                fsm_telemetry.start();

                let pacer = fsm_pacer.clone();
                let cell = callback_cell.clone();
                std::thread::Builder::new()
                    .name("auralink-stream-start".into())
                    .spawn(move || {
                        std::thread::sleep(STREAM_START_DELAY);
                        if let Some(fsm) = cell.get() {
                            if fsm.enter_streaming() {
                                pacer.start_streaming();
                            }
                        }
                    })
                    .expect("spawn stream-start watcher");
            }

            if matches!(new, ConnectionState::Idle | ConnectionState::Disconnecting) {
                fsm_pacer.stop_streaming();
                fsm_telemetry.stop();
            }
        }),
    );
    let _ = fsm_cell.set(fsm.clone());
    fsm.start();

    for (packet, from) in rx {
        fsm.dispatch(packet, from);
    }

    Ok(())
}
