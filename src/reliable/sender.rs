//! Selective Repeat send-side state machine.
//!
//! [`SrSender`] keeps up to `capacity` reliable packets in flight. Each one
//! carries its own retransmission deadline; an ACK cancels exactly that
//! deadline, and only expired packets are resent (never the whole window).
//!
//! ```text
//!   base                      next
//!    │                          │
//! ───┼──────────────────────────┼──────────────▶ seq space
//!    │ <── in flight (≤ cap) ──▶│ <── sendable ──▶
//! ```
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::window::SlotRing;
use crate::core::{
    DEFAULT_RETRANSMIT_INTERVAL, DEFAULT_WINDOW_CAPACITY, HudpError, HudpResult, SeqNum,
};
use crate::delivery::Transmit;
use crate::frame::{Channel, DataFrame, encode_data};
use crate::timing::wire_timestamp;

/// Send-side tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderConfig {
    /// Maximum packets in flight.
    pub capacity: u16,
    /// Delay before an unacknowledged packet is resent.
    pub retransmit_interval: Duration,
    /// Give up on a packet after this many retransmissions (`None` = never).
    pub max_retransmits: Option<u32>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_WINDOW_CAPACITY,
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            max_retransmits: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PacketState {
    InFlight,
    Acked,
    Abandoned,
}

/// Pending-ACK record for one in-flight packet.
#[derive(Debug, Clone)]
struct PendingPacket {
    datagram: Vec<u8>,
    first_sent: Instant,
    /// `None` once acknowledged or abandoned (timer cancelled).
    deadline: Option<Instant>,
    retransmits: u32,
    state: PacketState,
}

/// Result of processing an ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// A pending packet was acknowledged.
    Acked {
        /// Time since the first transmission.
        rtt: Duration,
        /// Retransmissions the packet needed.
        retransmits: u32,
        /// How far the window base advanced.
        slid: u16,
    },
    /// The packet was already acknowledged.
    Duplicate,
    /// The sequence number is not in the window (already slid past).
    Stale,
}

/// Something that happened when a retransmission deadline expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// Resend this datagram.
    Retransmit {
        /// The datagram, unchanged from the first transmission.
        transmit: Transmit,
        /// Retransmission count including this one.
        attempt: u32,
    },
    /// The packet hit the retransmission limit and was given up on.
    Abandoned {
        /// Sequence number of the abandoned packet.
        seq: SeqNum,
    },
}

/// Selective Repeat sender.
#[derive(Debug)]
pub struct SrSender {
    config: SenderConfig,
    /// Oldest unacknowledged sequence number (left window edge).
    base: SeqNum,
    /// Sequence number for the next new packet.
    next: SeqNum,
    pending: SlotRing<PendingPacket>,
}

impl SrSender {
    /// Create a new sender starting at sequence number zero.
    pub fn new(config: SenderConfig) -> Self {
        Self::with_start(config, SeqNum::ZERO)
    }

    /// Create a sender whose first packet uses `start`.
    pub fn with_start(config: SenderConfig, start: SeqNum) -> Self {
        Self {
            pending: SlotRing::new(config.capacity),
            config,
            base: start,
            next: start,
        }
    }

    /// Sender configuration.
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Oldest unacknowledged sequence number.
    pub fn base(&self) -> SeqNum {
        self.base
    }

    /// Sequence number the next submitted packet will get.
    pub fn next_seq(&self) -> SeqNum {
        self.next
    }

    /// Packets between `base` and `next`, acknowledged or not.
    pub fn in_flight(&self) -> u16 {
        self.next.distance_from(self.base)
    }

    /// Packets that can still be submitted before the window is full.
    pub fn window_space(&self) -> u16 {
        self.config.capacity.saturating_sub(self.in_flight())
    }

    /// Whether every submitted packet has been acknowledged or given up on.
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    /// Assign the next sequence number to `payload`, record it as pending
    /// and arm its retransmission timer.
    ///
    /// The returned datagram must be written to the peer immediately.
    pub fn submit(&mut self, payload: Vec<u8>, now: Instant) -> HudpResult<Transmit> {
        if self.window_space() == 0 {
            debug!(base = %self.base, next = %self.next, "send window full");
            return Err(HudpError::WindowFull {
                capacity: self.config.capacity,
            });
        }

        let seq = self.next;
        let frame = DataFrame::new(Channel::Reliable, seq, wire_timestamp(), payload);
        let datagram = encode_data(&frame)?;

        self.pending.insert(
            seq,
            PendingPacket {
                datagram: datagram.clone(),
                first_sent: now,
                deadline: Some(now + self.config.retransmit_interval),
                retransmits: 0,
                state: PacketState::InFlight,
            },
        );
        self.next = seq.next();

        debug!(%seq, base = %self.base, next = %self.next, "reliable packet sent");
        Ok(Transmit { seq, datagram })
    }

    /// Process an acknowledgment for `seq`.
    pub fn on_ack(&mut self, seq: SeqNum, now: Instant) -> AckOutcome {
        if !seq.is_within(self.base, self.in_flight()) {
            debug!(%seq, base = %self.base, "stale ack");
            return AckOutcome::Stale;
        }

        let Some(packet) = self.pending.get_mut(seq) else {
            return AckOutcome::Stale;
        };

        if packet.state == PacketState::Acked {
            debug!(%seq, "duplicate ack");
            return AckOutcome::Duplicate;
        }

        packet.state = PacketState::Acked;
        packet.deadline = None;
        let rtt = now.saturating_duration_since(packet.first_sent);
        let retransmits = packet.retransmits;

        let slid = if seq == self.base { self.slide() } else { 0 };
        debug!(%seq, rtt_ms = rtt.as_millis() as u64, slid, base = %self.base, "ack received");

        AckOutcome::Acked {
            rtt,
            retransmits,
            slid,
        }
    }

    /// Advance `base` past every contiguous acknowledged or abandoned entry.
    fn slide(&mut self) -> u16 {
        let mut slid = 0;
        while self.base != self.next {
            match self.pending.get(self.base).map(|p| p.state) {
                Some(PacketState::InFlight) => break,
                _ => {
                    self.pending.remove(self.base);
                    self.base = self.base.next();
                    slid += 1;
                }
            }
        }
        slid
    }

    /// Earliest pending retransmission deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().filter_map(|(_, p)| p.deadline).min()
    }

    /// Fire every retransmission timer that has expired by `now`.
    ///
    /// Expired packets are resent with the same sequence number and their
    /// timers re-armed; packets past `max_retransmits` are abandoned.
    pub fn poll_timeouts(&mut self, now: Instant) -> Vec<TimeoutEvent> {
        let mut events = Vec::new();

        for offset in 0..self.in_flight() {
            let seq = self.base.add(offset);
            let Some(packet) = self.pending.get_mut(seq) else {
                continue;
            };
            if packet.state != PacketState::InFlight
                || packet.deadline.is_none_or(|deadline| deadline > now)
            {
                continue;
            }

            if self
                .config
                .max_retransmits
                .is_some_and(|max| packet.retransmits >= max)
            {
                packet.state = PacketState::Abandoned;
                packet.deadline = None;
                warn!(%seq, retransmits = packet.retransmits, "giving up on reliable packet");
                events.push(TimeoutEvent::Abandoned { seq });
                continue;
            }

            packet.retransmits += 1;
            packet.deadline = Some(now + self.config.retransmit_interval);
            debug!(
                %seq,
                attempt = packet.retransmits,
                elapsed_ms = now.saturating_duration_since(packet.first_sent).as_millis() as u64,
                "retransmitting"
            );
            events.push(TimeoutEvent::Retransmit {
                transmit: Transmit {
                    seq,
                    datagram: packet.datagram.clone(),
                },
                attempt: packet.retransmits,
            });
        }

        if events
            .iter()
            .any(|e| matches!(e, TimeoutEvent::Abandoned { .. }))
        {
            self.slide();
        }

        events
    }

    /// Cancel every timer and release the window.
    ///
    /// Returns how many packets were still unacknowledged.
    pub fn close(&mut self) -> usize {
        let unacked = self
            .pending
            .iter()
            .filter(|(_, p)| p.state == PacketState::InFlight)
            .count();
        self.pending.clear();
        self.base = self.next;
        unacked
    }
}

impl Default for SrSender {
    fn default() -> Self {
        Self::new(SenderConfig::default())
    }
}
