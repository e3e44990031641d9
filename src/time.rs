//! 64-bit counters carried as `{hi, lo}` pairs and a monotonic clock.

use once_cell::sync::Lazy;

use crate::ffi::AsioSamples;

/// Rebuild a 64-bit value from its two 32-bit halves, high part first.
#[inline]
pub fn reassemble(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Split a 64-bit value into `(hi, lo)`.
#[inline]
pub fn split(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

impl AsioSamples {
    /// Pack a 64-bit count.
    pub fn from_u64(value: u64) -> Self {
        let (hi, lo) = split(value);
        Self { hi, lo }
    }

    /// Unpack into a 64-bit count.
    pub fn to_u64(self) -> u64 {
        reassemble(self.hi, self.lo)
    }
}

/// Monotonic timestamp in nanoseconds since first use.
pub fn monotonic_timestamp_ns() -> u64 {
    static START: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
    let elapsed = START.elapsed();
    (elapsed.as_secs() * 1_000_000_000) + elapsed.subsec_nanos() as u64
}
