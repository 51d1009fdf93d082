use nix::sys::time::TimeValLike;
use nix::time::ClockId;

use auralink_protocol::time::MonotonicMicros;

/// Reads the monotonic clock used for all scheduling and latency math:
/// packet timestamps, keepalive liveness, reconnect backoff, and the
/// jitter buffer's playout timing.
pub fn now() -> MonotonicMicros {
    let timespec = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)
        .expect("clock_gettime(CLOCK_MONOTONIC_RAW) failed, are we on Linux?");

    let micros = u64::try_from(timespec.num_microseconds())
        .expect("cannot convert i64 time value to u64");

    MonotonicMicros(micros)
}
