//! Fixed-cadence synthetic audio source.
//!
//! Grounded on `original_source/accessory/src/audio_streamer.cpp`:
//! absolute next-send-time scheduling (not a fixed `sleep(10ms)` per
//! iteration, which would drift), and "resync forward" rather than
//! burst-catch-up when the scheduler falls behind — if the next send
//! time has already passed by the time a packet goes out, the next
//! slot is rebased from *now*, not stacked immediately after the
//! missed one.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use auralink_protocol::payload::{AudioPayloadHeader, AUDIO_ENCODING_PCM16};
use auralink_protocol::time::MonotonicMicros;
use auralink_protocol::types::{AUDIO_PACKET_DURATION_MS, AUDIO_SAMPLES_PER_PACKET, AUDIO_SAMPLE_RATE};
use auralink_protocol::{Flags, Packet, PacketType};
use auralink_transport::Transport;

/// Synthetic fixture tone: 440Hz at a fixed amplitude, standing in for
/// "the actual audio input," which is out of scope.
const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 16000.0;

pub struct AudioPacer {
    transport: Arc<Transport>,
    sequence: AtomicU32,
    stream_start: Mutex<Option<MonotonicMicros>>,
    phase: Mutex<f64>,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPacer {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        Arc::new(AudioPacer {
            transport,
            sequence: AtomicU32::new(0),
            stream_start: Mutex::new(None),
            phase: Mutex::new(0.0),
            running: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    pub fn is_streaming(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_streaming(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.stream_start.lock().unwrap() = Some(auralink_util::time::now());
        self.sequence.store(0, Ordering::SeqCst);
        *self.phase.lock().unwrap() = 0.0;

        let pacer = self.clone();
        let handle = std::thread::Builder::new()
            .name("auralink-pacer".into())
            .spawn(move || pacer.streaming_loop())
            .expect("spawn pacer thread");
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop_streaming(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn streaming_loop(&self) {
        auralink_util::thread::set_realtime_priority();

        let interval = Duration::from_millis(AUDIO_PACKET_DURATION_MS);
        let mut next_packet_time = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= next_packet_time {
                self.send_audio_packet();
                next_packet_time += interval;
                if next_packet_time < now {
                    // Fell behind — rebase from now instead of firing
                    // a burst of catch-up packets.
                    next_packet_time = now + interval;
                }
            }

            let sleep_for = next_packet_time.saturating_duration_since(Instant::now());
            if !sleep_for.is_zero() {
                std::thread::sleep(sleep_for.min(Duration::from_millis(5)));
            }
        }
    }

    fn send_audio_packet(&self) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let stream_start = self.stream_start.lock().unwrap().expect("stream started");
        let now = auralink_util::time::now();
        let stream_timestamp = (now - stream_start) as u32;

        let header = AudioPayloadHeader {
            stream_timestamp,
            sample_count: AUDIO_SAMPLES_PER_PACKET,
            encoding: AUDIO_ENCODING_PCM16,
            reserved: 0,
        };

        let mut payload = header.to_bytes().to_vec();
        payload.extend_from_slice(&self.generate_samples());

        match Packet::new(PacketType::AudioData, Flags::ACK_REQUIRED, sequence, now.0 as u32, payload) {
            Ok(packet) => self.transport.send(packet),
            Err(e) => log::warn!("failed to build audio packet: {e}"),
        }
    }

    fn generate_samples(&self) -> Vec<u8> {
        let mut phase = self.phase.lock().unwrap();
        let step = 2.0 * PI * TONE_HZ / AUDIO_SAMPLE_RATE as f64;

        let mut bytes = Vec::with_capacity(AUDIO_SAMPLES_PER_PACKET as usize * 2);
        for _ in 0..AUDIO_SAMPLES_PER_PACKET {
            let sample = (phase.sin() * TONE_AMPLITUDE) as i16;
            bytes.extend_from_slice(&sample.to_le_bytes());

            *phase += step;
            if *phase >= 2.0 * PI {
                *phase -= 2.0 * PI;
            }
        }
        bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use auralink_transport::Socket;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    fn loopback_transport() -> Arc<Transport> {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        Arc::new(Transport::start(socket, true, Box::new(|_, _| {})))
    }

    #[test]
    fn start_stop_toggles_streaming_flag() {
        let pacer = AudioPacer::new(loopback_transport());
        assert!(!pacer.is_streaming());
        pacer.start_streaming();
        assert!(pacer.is_streaming());
        std::thread::sleep(StdDuration::from_millis(30));
        pacer.stop_streaming();
        assert!(!pacer.is_streaming());
    }

    #[test]
    fn sample_count_matches_packet_duration() {
        assert_eq!(AUDIO_SAMPLES_PER_PACKET, 480);
    }

    #[test]
    fn emits_audio_data_packets_to_the_learned_peer() {
        let (tx, rx) = mpsc::channel();

        let server_socket = Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let server_addr = server_socket.local_addr().unwrap();
        let server = Transport::start(
            server_socket,
            false,
            Box::new(move |p, _from| {
                let _ = tx.send(p);
            }),
        );

        let client_socket = Socket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let transport = Arc::new(Transport::start(client_socket, true, Box::new(|_, _| {})));

        // Prime the client's learned peer the way discovery normally
        // would: one datagram from the server is enough.
        server.send_to(
            Packet::new(PacketType::Keepalive, Flags::empty(), 0, 0, vec![]).unwrap(),
            transport.local_addr().unwrap(),
        );
        std::thread::sleep(StdDuration::from_millis(50));

        let pacer = AudioPacer::new(transport);
        pacer.start_streaming();
        let packet = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        pacer.stop_streaming();

        assert_eq!(packet.header.packet_type(), Some(PacketType::AudioData));
        let header = AudioPayloadHeader::from_bytes(&packet.payload).unwrap();
        assert_eq!(header.sample_count, AUDIO_SAMPLES_PER_PACKET);
        assert_eq!(
            packet.payload.len() - auralink_protocol::payload::AUDIO_PAYLOAD_HEADER_SIZE,
            AUDIO_SAMPLES_PER_PACKET as usize * 2
        );
    }
}
