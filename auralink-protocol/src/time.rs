//! Timestamp newtypes used by the wire format and the jitter buffer's
//! latency math. Pure value types — reading the clock is
//! `auralink_util::time`'s job, not this crate's.

use std::ops::Sub;

/// The header's `timestamp_us` field: the low 32 bits of the sender's
/// monotonic clock in microseconds. Wraps roughly every 71.6 minutes;
/// callers that need wall-clock deltas across a session use
/// [`MonotonicMicros`] instead and only narrow to this type at encode
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampUs(pub u32);

impl TimestampUs {
    pub fn from_monotonic(t: MonotonicMicros) -> Self {
        Self(t.0 as u32)
    }

    /// Wrapping difference `self - earlier`, for comparing two
    /// timestamps known to be close together (within one wrap period).
    pub fn wrapping_sub(self, earlier: Self) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }
}

/// A full-width monotonic microsecond counter, for in-process latency
/// and scheduling arithmetic that must not wrap during a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonotonicMicros(pub u64);

impl MonotonicMicros {
    pub fn checked_sub(self, earlier: Self) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }

    pub fn as_millis(self) -> u64 {
        self.0 / 1000
    }
}

impl Sub for MonotonicMicros {
    type Output = u64;

    /// Elapsed microseconds between two readings. Panics if `rhs` is
    /// later than `self`, matching the "clock never runs backwards"
    /// assumption the sync loop and keepalive watcher both depend on.
    fn sub(self, rhs: Self) -> u64 {
        self.checked_sub(rhs)
            .expect("monotonic clock readings must be non-decreasing")
    }
}
