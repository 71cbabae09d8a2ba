// clock.rs — wall-clock and monotonic millisecond helpers for the reactor.
//
// Timer deadlines use the wall clock on purpose: a backward jump must be
// observable so the loop can force-fire pending timers (clock-skew
// recovery). Durations measured for rate limiting use the monotonic clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// A clock set before 1970 is clamped to zero rather than panicking; the
/// skew-recovery path in the reactor handles the rest.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonic reference point for bounded-time work loops.
#[inline]
pub fn mono_start() -> Instant {
    Instant::now()
}

/// Milliseconds elapsed since a `mono_start` sample.
#[inline]
pub fn mono_elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
