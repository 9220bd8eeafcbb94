//! Superclock: sample-rate-independent audio time
//!
//! The superclock is a 64-bit tick count at a fixed rate chosen so that
//! every common sample rate and every common note divisor divides it
//! evenly. Converting superclocks to samples is therefore exact at any
//! supported rate, and musical subdivisions never accumulate rounding
//! error.

/// Superclock tick count (one second == `SUPERCLOCK_TICKS_PER_SECOND`)
pub type Superclock = i64;

/// Sample position on the audio timeline
pub type SamplePos = i64;

/// Sample count / distance
pub type SampleCnt = i64;

/// (`282,240,000`) Superclock ticks per second.
///
/// Factors as 2^10 * 3^2 * 5^4 * 7^2, so it is divisible by the whole
/// 44.1 kHz and 48 kHz sample-rate families up to 384 kHz (44100 -> 6400
/// ticks per sample, 48000 -> 5880, 96000 -> 2940, 192000 -> 1470, ...)
/// and by the note divisors 2, 3, 4, 5, 6, 7, 8, 9, 10, 12, 14, 15, 16
/// and their products.
pub const SUPERCLOCK_TICKS_PER_SECOND: Superclock = 282_240_000;

/// Integer division rounded half away from zero.
#[inline]
pub(crate) fn round_div(n: i128, d: i128) -> i64 {
    debug_assert!(d > 0);
    let r = if n >= 0 { (n + d / 2) / d } else { (n - d / 2) / d };
    r as i64
}

/// Convert a superclock position/duration to samples at the given rate.
#[inline]
pub fn superclock_to_samples(sc: Superclock, sample_rate: u32) -> SamplePos {
    round_div(
        sc as i128 * sample_rate as i128,
        SUPERCLOCK_TICKS_PER_SECOND as i128,
    )
}

/// Convert a sample position/duration to superclocks at the given rate.
#[inline]
pub fn samples_to_superclock(samples: SamplePos, sample_rate: u32) -> Superclock {
    round_div(
        samples as i128 * SUPERCLOCK_TICKS_PER_SECOND as i128,
        sample_rate as i128,
    )
}
