//! Selective Repeat receive-side state machine.
//!
//! [`SrReceiver`] delivers reliable payloads in sequence order, buffering
//! anything that arrives ahead of a gap. Every frame inside or behind the
//! window is acknowledged; frames beyond the window are dropped unacknowledged
//! so the sender retransmits them once the window has moved.
//!
//! A gap that stays open for longer than the skip timeout is abandoned: the
//! receiver jumps to the next buffered frame and releases the run behind it.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::window::SlotRing;
use crate::core::{DEFAULT_SKIP_TIMEOUT, DEFAULT_WINDOW_CAPACITY, SeqNum};
use crate::delivery::Delivered;
use crate::frame::{AckFrame, Channel, DataFrame};
use crate::timing::{latency_ms, wire_timestamp};

/// Receive-side tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverConfig {
    /// Width of the receive window.
    pub capacity: u16,
    /// How long a missing sequence number may stall delivery.
    pub skip_timeout: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            skip_timeout: DEFAULT_SKIP_TIMEOUT,
        }
    }
}

/// How an inbound reliable frame was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// It was the expected frame and got delivered.
    InOrder,
    /// It filled a slot ahead of a gap.
    Buffered,
    /// Already delivered, already buffered, or skipped.
    Duplicate,
    /// Beyond the window; dropped without an ACK.
    TooFarAhead,
}

/// Result of [`SrReceiver::on_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// ACK to send back to the frame's source.
    pub ack: Option<AckFrame>,
    /// Payloads released in sequence order.
    pub delivered: Vec<Delivered>,
    /// Classification of the frame.
    pub disposition: Disposition,
}

/// Result of [`SrReceiver::poll_skip`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipOutcome {
    /// Sequence numbers given up on.
    pub skipped: Vec<SeqNum>,
    /// Payloads released after the gap.
    pub delivered: Vec<Delivered>,
}

impl SkipOutcome {
    /// Whether the skip timer fired.
    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Selective Repeat receiver.
#[derive(Debug)]
pub struct SrReceiver {
    config: ReceiverConfig,
    /// Next sequence number to hand to the application.
    expected: SeqNum,
    buffer: SlotRing<Delivered>,
    /// When `expected` started waiting on a gap.
    stalled_since: Option<Instant>,
}

impl SrReceiver {
    /// Create a receiver expecting sequence number zero.
    pub fn new(config: ReceiverConfig) -> Self {
        Self::with_start(config, SeqNum::ZERO)
    }

    /// Create a receiver expecting `start` first.
    pub fn with_start(config: ReceiverConfig, start: SeqNum) -> Self {
        Self {
            buffer: SlotRing::new(config.capacity),
            config,
            expected: start,
            stalled_since: None,
        }
    }

    /// Receiver configuration.
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Next in-order sequence number.
    pub fn expected(&self) -> SeqNum {
        self.expected
    }

    /// Number of out-of-order frames held.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Deadline at which the current gap will be skipped.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.stalled_since
            .map(|since| since + self.config.skip_timeout)
    }

    /// Process an inbound reliable data frame.
    pub fn on_frame(&mut self, frame: DataFrame, now: Instant) -> ReceiveOutcome {
        let seq = frame.seq;
        let ack = AckFrame::new(seq, frame.timestamp);
        let offset = seq.distance_from(self.expected);

        if offset == 0 {
            let mut delivered = vec![to_delivered(frame)];
            self.expected = self.expected.next();
            self.drain(&mut delivered);
            self.reset_stall(now);
            debug!(%seq, expected = %self.expected, released = delivered.len(), "in-order delivery");
            return ReceiveOutcome {
                ack: Some(ack),
                delivered,
                disposition: Disposition::InOrder,
            };
        }

        if offset < self.config.capacity {
            let disposition = if self.buffer.contains(seq) {
                debug!(%seq, "duplicate of buffered frame");
                Disposition::Duplicate
            } else {
                self.buffer.insert(seq, to_delivered(frame));
                if self.stalled_since.is_none() {
                    self.stalled_since = Some(now);
                }
                debug!(%seq, expected = %self.expected, buffered = self.buffer.len(), "buffered out of order");
                Disposition::Buffered
            };
            return ReceiveOutcome {
                ack: Some(ack),
                delivered: Vec::new(),
                disposition,
            };
        }

        if seq.precedes(self.expected) {
            debug!(%seq, expected = %self.expected, "duplicate of delivered frame, re-acking");
            return ReceiveOutcome {
                ack: Some(ack),
                delivered: Vec::new(),
                disposition: Disposition::Duplicate,
            };
        }

        warn!(%seq, expected = %self.expected, capacity = self.config.capacity, "frame beyond receive window dropped");
        ReceiveOutcome {
            ack: None,
            delivered: Vec::new(),
            disposition: Disposition::TooFarAhead,
        }
    }

    /// Skip the gap at `expected` if it has been open for the skip timeout.
    pub fn poll_skip(&mut self, now: Instant) -> SkipOutcome {
        let due = self.next_deadline().is_some_and(|deadline| deadline <= now);
        if !due || self.buffer.is_empty() {
            return SkipOutcome::default();
        }

        let Some(resume) = (1..self.config.capacity)
            .map(|offset| self.expected.add(offset))
            .find(|seq| self.buffer.contains(*seq))
        else {
            self.stalled_since = None;
            return SkipOutcome::default();
        };

        let skipped: Vec<SeqNum> = (0..resume.distance_from(self.expected))
            .map(|offset| self.expected.add(offset))
            .collect();
        warn!(
            from = %self.expected,
            to = %resume,
            gap = skipped.len(),
            "skip timeout expired, abandoning gap"
        );

        self.expected = resume;
        let mut delivered = Vec::new();
        self.drain(&mut delivered);
        self.reset_stall(now);

        SkipOutcome { skipped, delivered }
    }

    /// Release every contiguous buffered frame starting at `expected`.
    fn drain(&mut self, out: &mut Vec<Delivered>) {
        while let Some(next) = self.buffer.remove(self.expected) {
            out.push(next);
            self.expected = self.expected.next();
        }
    }

    /// Restart the stall clock after `expected` moved.
    fn reset_stall(&mut self, now: Instant) {
        self.stalled_since = if self.buffer.is_empty() {
            None
        } else {
            Some(now)
        };
    }

    /// Drop buffered frames and cancel the skip timer.
    ///
    /// Returns how many buffered frames were discarded.
    pub fn close(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.stalled_since = None;
        dropped
    }
}

impl Default for SrReceiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

fn to_delivered(frame: DataFrame) -> Delivered {
    Delivered {
        channel: Channel::Reliable,
        seq: frame.seq,
        latency_ms: latency_ms(frame.timestamp, wire_timestamp()),
        timestamp: frame.timestamp,
        payload: frame.payload,
    }
}
