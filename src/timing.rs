//! Wire timestamps and latency measurement.
//!
//! Data frames carry the sender's wall clock in milliseconds truncated to
//! 32 bits. The receiver compares it with its own clock to estimate one-way
//! latency, which is only meaningful when both clocks agree (same host or
//! synchronized hosts).

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current wall clock as a 32-bit wire timestamp.
pub fn wire_timestamp() -> u32 {
    unix_millis() as u32
}

/// Elapsed milliseconds from `sent` to `arrived`, tolerating one wrap of the
/// 32-bit timestamp.
pub fn latency_ms(sent: u32, arrived: u32) -> u32 {
    arrived.wrapping_sub(sent)
}
