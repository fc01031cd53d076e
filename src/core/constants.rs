//! Protocol constants for H-UDP.
//!
//! Wire-level values are fixed by the protocol and MUST NOT be changed;
//! the `DEFAULT_*` values can be overridden through the session configuration.

use std::time::Duration;

// =============================================================================
// CHANNEL TAGS
// =============================================================================

/// Reliable data frame (Selective Repeat channel).
pub const TAG_RELIABLE_DATA: u8 = 0x00;

/// Unreliable data frame (fire-and-forget channel).
pub const TAG_UNRELIABLE_DATA: u8 = 0x01;

/// Acknowledgment for a reliable data frame.
pub const TAG_RELIABLE_ACK: u8 = 0x02;

// =============================================================================
// FRAME SIZES
// =============================================================================

/// Data frame header size (tag + seq + timestamp + payload length).
pub const DATA_HEADER_SIZE: usize = 1 + 2 + 4 + 2;

/// ACK frame size (tag + acked seq + echoed timestamp).
pub const ACK_FRAME_SIZE: usize = 1 + 2 + 4;

/// Largest payload a single data frame may carry.
///
/// Keeps a full frame under a 1400-byte datagram.
pub const MAX_PAYLOAD_SIZE: usize = 1391;

/// Largest datagram the protocol ever produces.
pub const MAX_DATAGRAM_SIZE: usize = DATA_HEADER_SIZE + MAX_PAYLOAD_SIZE;

// =============================================================================
// SEQUENCE SPACE
// =============================================================================

/// Number of distinct sequence numbers (16-bit wraparound).
pub const SEQ_SPACE: u32 = 1 << 16;

/// Largest window that keeps window membership unambiguous.
pub const MAX_WINDOW_CAPACITY: u16 = (SEQ_SPACE / 2) as u16;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default send/receive window capacity.
pub const DEFAULT_WINDOW_CAPACITY: u16 = 32;

/// Default sender retransmission interval.
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);

/// Default receiver skip timeout.
///
/// Should exceed twice the retransmission interval so one retry round-trip
/// fits before the receiver abandons a gap.
pub const DEFAULT_SKIP_TIMEOUT: Duration = Duration::from_millis(450);

/// Default capacity of the application delivery queue.
pub const DEFAULT_DELIVERY_QUEUE_CAPACITY: usize = 1024;

/// Default socket receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 2048;
