//! Monotonic tick clock
//!
//! The counter itself lives in the kernel flags as an atomic hi/lo pair
//! (Cortex-M4 has no 64-bit atomics); this module provides the read
//! side, duration conversions, and deadline arithmetic.

use crate::config::CFG_TICK_RATE_HZ;
use crate::kernel;
use crate::types::OsTick;

/// Current tick count since `os_start`.
#[inline]
pub fn os_clock_now() -> OsTick {
    kernel::KERNEL.tick_now()
}

/// Absolute deadline `ticks` from now, saturating at [`FOREVER`].
///
/// [`FOREVER`]: crate::types::FOREVER
#[inline]
pub fn deadline_after(ticks: OsTick) -> OsTick {
    os_clock_now().saturating_add(ticks)
}

/// Convert microseconds to ticks, rounding up.
///
/// Rounding up guarantees a requested duration is never shortened by
/// the conversion.
#[inline]
pub fn ticks_from_micros(us: u64) -> OsTick {
    let scaled = us as u128 * CFG_TICK_RATE_HZ as u128;
    ((scaled + 999_999) / 1_000_000) as OsTick
}

/// Convert milliseconds to ticks, rounding up.
#[inline]
pub fn ticks_from_millis(ms: u64) -> OsTick {
    let scaled = ms as u128 * CFG_TICK_RATE_HZ as u128;
    ((scaled + 999) / 1_000) as OsTick
}

/// Convert ticks to microseconds, truncating.
#[inline]
pub fn micros_from_ticks(ticks: OsTick) -> u64 {
    (ticks as u128 * 1_000_000 / CFG_TICK_RATE_HZ as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_never_rounds_down() {
        // 1 µs still costs a full tick at 1 kHz
        assert_eq!(ticks_from_micros(1), 1);
        assert_eq!(ticks_from_micros(0), 0);
        assert_eq!(ticks_from_micros(1_000), 1);
        assert_eq!(ticks_from_micros(1_001), 2);

        assert_eq!(ticks_from_millis(1), 1);
        assert_eq!(ticks_from_millis(999), 999);
    }

    #[test]
    fn test_round_trip() {
        for t in [0u64, 1, 7, 1_000, 123_456_789] {
            assert_eq!(ticks_from_micros(micros_from_ticks(t)), t);
        }
    }

    #[test]
    fn test_no_overflow_on_large_durations() {
        // a u64 microsecond count near the maximum must not wrap
        let t = ticks_from_micros(u64::MAX);
        assert!(t > 0);
    }
}
