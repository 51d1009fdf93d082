//! Sequence-keyed adaptive jitter buffer — the centerpiece of the
//! audio transport path.
//!
//! Grounded on `original_source/host/src/audio_sync.cpp`'s
//! `AudioSync`: packets land in an ordered map under a mutex;
//! `sync_loop` has a startup phase that waits (with a 100ms poll) for
//! the buffer to reach its target size before picking a playout
//! epoch, then a steady-state phase that plays each sequence number in
//! turn, treats a 100ms-stale gap as a loss, and grows the target size
//! after three consecutive losses.
//!
//! Per the spec's own design note, the reference's epoch sentinel
//! (`next_play_sequence_ == 0`) is a bug — it cannot tell "nothing has
//! played yet" apart from "legitimately about to play sequence 0".
//! This implementation uses an explicit `started: bool` instead.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use auralink_protocol::payload::AudioPayloadHeader;
use auralink_protocol::time::MonotonicMicros;
use auralink_protocol::types::{
    DEFAULT_JITTER_BUFFER_PACKETS, MAX_JITTER_BUFFER_PACKETS, MIN_JITTER_BUFFER_PACKETS,
};

/// How long the startup phase waits, per poll, for the buffer to
/// reach its target size before re-checking whether to give up and
/// start playing from whatever has arrived.
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// A sequence slot considered stale (and therefore lost) once this
/// many milliseconds have passed since the last packet arrived.
const LOSS_GRACE_MS: u64 = 100;

/// Steady-state poll interval while waiting for the next sequence
/// number or for the grace window to elapse.
const STEADY_POLL: Duration = Duration::from_millis(5);

/// Three consecutive losses trigger a one-step buffer growth.
const LOSS_GROWTH_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct AudioPacketRecord {
    pub sequence: u32,
    pub stream_timestamp: u32,
    pub received_timestamp: MonotonicMicros,
    pub sample_count: u16,
    pub audio_data: Vec<u8>,
}

/// Where decoded, paced-out audio goes. The real output device is out
/// of scope; [`LoggingSink`] stands in for it.
pub trait AudioSink {
    fn play(&self, record: &AudioPacketRecord);
}

pub struct LoggingSink;

impl AudioSink for LoggingSink {
    fn play(&self, record: &AudioPacketRecord) {
        log::debug!(
            "playout seq={} samples={} stream_ts={}",
            record.sequence,
            record.sample_count,
            record.stream_timestamp
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JitterBufferStats {
    pub packets_received: u64,
    pub packets_played: u64,
    pub packets_dropped: u64,
    /// Reserved for packets that arrive late enough to miss their
    /// playout slot but are still in the buffer when it happens — not
    /// produced by the current loss-detection path, which only ever
    /// drops a sequence it never received in time.
    pub packets_late: u64,
    pub buffer_underruns: u64,
    pub current_latency_ms: i64,
    pub avg_latency_ms: f64,
    pub max_latency_ms: i64,
}

pub struct JitterBuffer {
    buffer: Mutex<BTreeMap<u32, AudioPacketRecord>>,
    cv: Condvar,
    target_size: Mutex<u8>,
    started: Mutex<bool>,
    next_play_sequence: Mutex<u32>,
    stream_start_time: Mutex<Option<MonotonicMicros>>,
    last_packet_time: Mutex<MonotonicMicros>,
    consecutive_losses: Mutex<u32>,
    stats: Mutex<JitterBufferStats>,
    running: AtomicBool,
    sync_thread: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn AudioSink + Send + Sync>,
}

impl JitterBuffer {
    pub fn new(sink: Arc<dyn AudioSink + Send + Sync>) -> Arc<Self> {
        let now = auralink_util::time::now();
        Arc::new(JitterBuffer {
            buffer: Mutex::new(BTreeMap::new()),
            cv: Condvar::new(),
            target_size: Mutex::new(DEFAULT_JITTER_BUFFER_PACKETS),
            started: Mutex::new(false),
            next_play_sequence: Mutex::new(0),
            stream_start_time: Mutex::new(None),
            last_packet_time: Mutex::new(now),
            consecutive_losses: Mutex::new(0),
            stats: Mutex::new(JitterBufferStats::default()),
            running: AtomicBool::new(false),
            sync_thread: Mutex::new(None),
            sink,
        })
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let now = auralink_util::time::now();
        *self.stream_start_time.lock().unwrap() = Some(now);
        *self.last_packet_time.lock().unwrap() = now;
        *self.started.lock().unwrap() = false;
        *self.consecutive_losses.lock().unwrap() = 0;
        self.buffer.lock().unwrap().clear();

        let jb = self.clone();
        let handle = std::thread::Builder::new()
            .name("auralink-jitter-sync".into())
            .spawn(move || jb.sync_loop())
            .expect("spawn jitter buffer sync thread");
        *self.sync_thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cv.notify_all();
        if let Some(handle) = self.sync_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> JitterBufferStats {
        *self.stats.lock().unwrap()
    }

    pub fn set_target_size(&self, size: u8) {
        *self.target_size.lock().unwrap() =
            size.clamp(MIN_JITTER_BUFFER_PACKETS, MAX_JITTER_BUFFER_PACKETS);
    }

    pub fn target_size(&self) -> u8 {
        *self.target_size.lock().unwrap()
    }

    /// Inserts a received audio packet and updates latency stats.
    /// Duplicate sequence numbers overwrite the earlier record, same
    /// as the reference's `std::map::operator[]`.
    pub fn on_audio_packet(&self, sequence: u32, header: &AudioPayloadHeader, audio_data: &[u8]) {
        let now = auralink_util::time::now();
        let record = AudioPacketRecord {
            sequence,
            stream_timestamp: header.stream_timestamp,
            received_timestamp: now,
            sample_count: header.sample_count,
            audio_data: audio_data.to_vec(),
        };

        self.buffer.lock().unwrap().insert(sequence, record);
        *self.last_packet_time.lock().unwrap() = now;

        let stream_start = self.stream_start_time.lock().unwrap().unwrap_or(now);
        let elapsed_us = now.checked_sub(stream_start).unwrap_or(0) as i64;
        let latency_us = elapsed_us - header.stream_timestamp as i64;
        let latency_ms = latency_us / 1000;

        let mut stats = self.stats.lock().unwrap();
        stats.packets_received += 1;
        stats.current_latency_ms = latency_ms;
        stats.avg_latency_ms +=
            (latency_ms as f64 - stats.avg_latency_ms) / stats.packets_received as f64;
        stats.max_latency_ms = stats.max_latency_ms.max(latency_ms);
        drop(stats);

        self.cv.notify_all();
    }

    fn sync_loop(&self) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }

            let target = *self.target_size.lock().unwrap() as usize;
            let buf = self.buffer.lock().unwrap();
            let (buf, _timeout) = self
                .cv
                .wait_timeout_while(buf, STARTUP_POLL, |b| {
                    b.len() < target && self.running.load(Ordering::SeqCst)
                })
                .unwrap();

            if !self.running.load(Ordering::SeqCst) {
                return;
            }

            if let Some((&first_seq, _)) = buf.iter().next() {
                drop(buf);
                *self.next_play_sequence.lock().unwrap() = first_seq;
                *self.started.lock().unwrap() = true;
                break;
            }
        }

        while self.running.load(Ordering::SeqCst) {
            let next_seq = *self.next_play_sequence.lock().unwrap();
            let popped = self.buffer.lock().unwrap().remove(&next_seq);

            if let Some(record) = popped {
                self.sink.play(&record);
                self.stats.lock().unwrap().packets_played += 1;
                *self.next_play_sequence.lock().unwrap() = next_seq.wrapping_add(1);
                *self.consecutive_losses.lock().unwrap() = 0;
                continue;
            }

            let since_last_ms =
                (auralink_util::time::now() - *self.last_packet_time.lock().unwrap()) / 1000;
            if since_last_ms > LOSS_GRACE_MS {
                self.handle_packet_loss(next_seq);
            } else {
                std::thread::sleep(STEADY_POLL);
            }
        }
    }

    fn handle_packet_loss(&self, missing_seq: u32) {
        self.stats.lock().unwrap().packets_dropped += 1;
        *self.next_play_sequence.lock().unwrap() = missing_seq.wrapping_add(1);
        log::warn!("sequence {missing_seq} considered lost, skipping");

        let mut losses = self.consecutive_losses.lock().unwrap();
        *losses += 1;
        if *losses >= LOSS_GROWTH_THRESHOLD {
            *losses = 0;
            drop(losses);
            self.grow_target();
        }
    }

    fn grow_target(&self) {
        let mut target = self.target_size.lock().unwrap();
        if *target < MAX_JITTER_BUFFER_PACKETS {
            *target += 1;
            self.stats.lock().unwrap().buffer_underruns += 1;
            log::info!("jitter buffer grown to {} packets", *target);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    struct RecordingSink {
        played: StdMutex<Vec<u32>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                played: StdMutex::new(Vec::new()),
            })
        }
        fn played(&self) -> Vec<u32> {
            self.played.lock().unwrap().clone()
        }
    }

    impl AudioSink for RecordingSink {
        fn play(&self, record: &AudioPacketRecord) {
            self.played.lock().unwrap().push(record.sequence);
        }
    }

    fn header(stream_timestamp: u32) -> AudioPayloadHeader {
        AudioPayloadHeader {
            stream_timestamp,
            sample_count: 480,
            encoding: 0,
            reserved: 0,
        }
    }

    #[test]
    fn starts_empty_with_default_target_size() {
        let sink = RecordingSink::new();
        let jb = JitterBuffer::new(sink);
        assert_eq!(jb.target_size(), DEFAULT_JITTER_BUFFER_PACKETS);
        assert_eq!(jb.stats().packets_received, 0);
    }

    #[test]
    fn set_target_size_clamps_to_bounds() {
        let jb = JitterBuffer::new(RecordingSink::new());
        jb.set_target_size(0);
        assert_eq!(jb.target_size(), MIN_JITTER_BUFFER_PACKETS);
        jb.set_target_size(255);
        assert_eq!(jb.target_size(), MAX_JITTER_BUFFER_PACKETS);
    }

    #[test]
    fn on_audio_packet_increments_received_count() {
        let jb = JitterBuffer::new(RecordingSink::new());
        jb.on_audio_packet(0, &header(0), &[0u8; 960]);
        jb.on_audio_packet(1, &header(10_000), &[0u8; 960]);
        assert_eq!(jb.stats().packets_received, 2);
    }

    #[test]
    fn plays_packets_in_sequence_order_once_started() {
        let sink = RecordingSink::new();
        let jb = JitterBuffer::new(sink.clone());
        jb.start();

        for seq in 0..DEFAULT_JITTER_BUFFER_PACKETS as u32 + 2 {
            jb.on_audio_packet(seq, &header(seq * 10_000), &[0u8; 960]);
        }

        std::thread::sleep(StdDuration::from_millis(300));
        jb.stop();

        let played = sink.played();
        assert!(!played.is_empty());
        let mut sorted = played.clone();
        sorted.sort_unstable();
        assert_eq!(played, sorted, "playout must stay in sequence order");
    }

    #[test]
    fn playing_a_packet_increments_packets_played() {
        let sink = RecordingSink::new();
        let jb = JitterBuffer::new(sink.clone());
        jb.start();

        for seq in 0..DEFAULT_JITTER_BUFFER_PACKETS as u32 + 2 {
            jb.on_audio_packet(seq, &header(seq * 10_000), &[0u8; 960]);
        }

        std::thread::sleep(StdDuration::from_millis(300));
        jb.stop();

        assert_eq!(jb.stats().packets_played, sink.played().len() as u64);
        assert!(jb.stats().packets_played > 0);
    }

    #[test]
    fn missing_sequence_zero_does_not_get_stuck_on_sentinel() {
        // Regression test for the reference's `next_play_sequence_ ==
        // 0` bug: sequence 0 must be playable, not mistaken for "not
        // started yet".
        let sink = RecordingSink::new();
        let jb = JitterBuffer::new(sink.clone());
        jb.start();

        for seq in 0..DEFAULT_JITTER_BUFFER_PACKETS as u32 {
            jb.on_audio_packet(seq, &header(seq * 10_000), &[0u8; 960]);
        }

        std::thread::sleep(StdDuration::from_millis(300));
        jb.stop();

        assert!(sink.played().contains(&0));
    }

    #[test]
    fn three_consecutive_losses_grow_the_target_size() {
        let jb = JitterBuffer::new(RecordingSink::new());
        let before = jb.target_size();
        jb.handle_packet_loss(10);
        jb.handle_packet_loss(11);
        jb.handle_packet_loss(12);
        assert_eq!(jb.target_size(), before + 1);
        assert_eq!(jb.stats().buffer_underruns, 1);
    }

    #[test]
    fn growth_caps_at_max_and_resets_loss_counter() {
        let jb = JitterBuffer::new(RecordingSink::new());
        jb.set_target_size(MAX_JITTER_BUFFER_PACKETS);
        jb.handle_packet_loss(0);
        jb.handle_packet_loss(1);
        jb.handle_packet_loss(2);
        assert_eq!(jb.target_size(), MAX_JITTER_BUFFER_PACKETS);
    }
}
