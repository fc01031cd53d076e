//! Unreliable channel: fire-and-forget datagrams.
//!
//! Frames carry a monotonically increasing sequence number so loss and
//! reordering can be observed, but nothing is acknowledged, buffered or
//! retransmitted.

use tracing::trace;

use crate::core::{HudpResult, SeqNum};
use crate::delivery::{Delivered, Transmit};
use crate::frame::{Channel, DataFrame, encode_data};
use crate::timing::{latency_ms, wire_timestamp};

/// Sequence counter for unreliable frames.
#[derive(Debug, Default)]
pub struct UnreliableSender {
    next: SeqNum,
}

impl UnreliableSender {
    /// Create a sender starting at sequence number zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next frame will get.
    pub fn next_seq(&self) -> SeqNum {
        self.next
    }

    /// Frame `payload` with the next sequence number.
    ///
    /// An oversized payload is rejected without consuming a number.
    pub fn prepare(&mut self, payload: Vec<u8>) -> HudpResult<Transmit> {
        let seq = self.next;
        let frame = DataFrame::new(Channel::Unreliable, seq, wire_timestamp(), payload);
        let datagram = encode_data(&frame)?;
        self.next = seq.next();
        trace!(%seq, "unreliable packet prepared");
        Ok(Transmit { seq, datagram })
    }
}

/// Pass-through for unreliable frames.
#[derive(Debug, Default)]
pub struct UnreliableReceiver {
    received: u64,
}

impl UnreliableReceiver {
    /// Create a receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames handed out so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Hand an inbound frame straight to the application.
    pub fn on_frame(&mut self, frame: DataFrame) -> Delivered {
        self.received += 1;
        Delivered {
            channel: Channel::Unreliable,
            seq: frame.seq,
            latency_ms: latency_ms(frame.timestamp, wire_timestamp()),
            timestamp: frame.timestamp,
            payload: frame.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HudpError, MAX_PAYLOAD_SIZE};
    use crate::frame::{Frame, decode};

    #[test]
    fn test_prepare_is_monotonic() {
        let mut tx = UnreliableSender::new();
        for i in 0..3u16 {
            let t = tx.prepare(vec![9; 4]).unwrap();
            assert_eq!(t.seq, SeqNum::new(i));
            let Frame::Data(frame) = decode(&t.datagram).unwrap() else {
                panic!("expected data frame");
            };
            assert_eq!(frame.channel, Channel::Unreliable);
        }
        assert_eq!(tx.next_seq(), SeqNum::new(3));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut tx = UnreliableSender::new();
        let err = tx.prepare(vec![0; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, HudpError::Encode(_)));
        assert_eq!(tx.next_seq(), SeqNum::ZERO);
    }

    #[test]
    fn test_receiver_passes_duplicates_and_reordering() {
        let mut rx = UnreliableReceiver::new();
        let order = [3u16, 1, 1, 2];
        let seqs: Vec<u16> = order
            .iter()
            .map(|s| {
                let frame = DataFrame::new(Channel::Unreliable, SeqNum::new(*s), 0, vec![]);
                rx.on_frame(frame).seq.get()
            })
            .collect();
        assert_eq!(seqs, order);
        assert_eq!(rx.received(), 4);
    }
}
