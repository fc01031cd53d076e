//! Values exchanged between the protocol state machines and the I/O layer.
//!
//! The state machines never touch a socket: they hand back [`Transmit`]s to
//! write and [`Delivered`] payloads for the application.

use crate::core::SeqNum;
use crate::frame::Channel;

/// A datagram the caller must write to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Sequence number of the frame inside.
    pub seq: SeqNum,
    /// Encoded frame.
    pub datagram: Vec<u8>,
}

/// A payload ready for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Channel the payload arrived on.
    pub channel: Channel,
    /// Sender-assigned sequence number.
    pub seq: SeqNum,
    /// Application payload.
    pub payload: Vec<u8>,
    /// Sender's wire timestamp.
    pub timestamp: u32,
    /// One-way latency in milliseconds (sender clock to receiver clock).
    pub latency_ms: u32,
}

impl Delivered {
    /// Whether this payload came over the reliable channel.
    pub fn is_reliable(&self) -> bool {
        self.channel.is_reliable()
    }
}
