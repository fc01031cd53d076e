//! Packet tracking for measurement.
//!
//! Every send-side and receive-side event is folded into per-channel
//! [`DeliveryStats`] and buffered until it is persisted as JSON lines.
//! Nothing here influences protocol behaviour.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::SeqNum;
use crate::frame::Channel;
use crate::timing::unix_millis;

/// File the sent-packet log is appended to.
pub const SENT_LOG_FILE: &str = "sent_packets.jsonl";

/// File the received-packet log is appended to.
pub const RECEIVED_LOG_FILE: &str = "received_packets.jsonl";

/// Send-side event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SentEvent {
    /// First transmission.
    Sent,
    /// Timer expired and the packet was resent.
    Retransmitted {
        /// Retransmission count including this one.
        attempt: u32,
    },
    /// Peer acknowledged the packet.
    Acknowledged {
        /// Time from first transmission to the ACK.
        rtt_ms: u64,
    },
    /// Retransmission limit reached.
    Abandoned,
}

/// Receive-side event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReceivedEvent {
    /// Payload handed to the application.
    Delivered {
        /// One-way latency.
        latency_ms: u32,
    },
    /// Reliable frame seen before.
    Duplicate,
    /// Reliable sequence number given up on by the skip timer.
    Skipped,
}

/// One send-side log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    /// Packet sequence number.
    pub seq: SeqNum,
    /// Channel the packet used.
    pub channel: Channel,
    /// Whether the channel is reliable.
    pub reliable: bool,
    /// Wall clock of the event.
    pub timestamp_ms: u64,
    /// What happened.
    #[serde(flatten)]
    pub event: SentEvent,
}

/// One receive-side log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedRecord {
    /// Packet sequence number.
    pub seq: SeqNum,
    /// Channel the packet used.
    pub channel: Channel,
    /// Whether the channel is reliable.
    pub reliable: bool,
    /// Wall clock of the event.
    pub timestamp_ms: u64,
    /// What happened.
    #[serde(flatten)]
    pub event: ReceivedEvent,
}

/// Totals for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    /// Distinct packets sent.
    pub sent: u64,
    /// Packets acknowledged by the peer.
    pub acknowledged: u64,
    /// Retransmissions performed.
    pub retransmissions: u64,
    /// Packets given up on by the sender.
    pub abandoned: u64,
    /// Payloads handed to the application.
    pub delivered: u64,
    /// Duplicate reliable frames discarded.
    pub duplicates: u64,
    /// Packets known to be missing at the receiver.
    pub lost: u64,
    /// Mean one-way latency of delivered payloads.
    pub avg_latency_ms: Option<f64>,
}

impl ChannelStats {
    /// Fraction of sent packets that were acknowledged.
    pub fn ack_ratio(&self) -> Option<f64> {
        (self.sent > 0).then(|| self.acknowledged as f64 / self.sent as f64)
    }

    /// Fraction of packets that reached the application.
    pub fn delivery_ratio(&self) -> Option<f64> {
        let expected = self.delivered + self.lost;
        (expected > 0).then(|| self.delivered as f64 / expected as f64)
    }
}

/// A sequence number recorded as missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LostPacket {
    /// Channel it was sent on.
    pub channel: Channel,
    /// Its sequence number.
    pub seq: SeqNum,
}

/// Aggregated view over both logs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// Reliable channel totals.
    pub reliable: ChannelStats,
    /// Unreliable channel totals.
    pub unreliable: ChannelStats,
    /// Every sequence number counted in `lost`.
    pub lost_packets: Vec<LostPacket>,
}

impl DeliveryStats {
    /// Packets sent on both channels.
    pub fn total_sent(&self) -> u64 {
        self.reliable.sent + self.unreliable.sent
    }

    /// Payloads delivered on both channels.
    pub fn total_delivered(&self) -> u64 {
        self.reliable.delivered + self.unreliable.delivered
    }

    /// Delivery ratio across both channels.
    pub fn overall_delivery_ratio(&self) -> Option<f64> {
        let delivered = self.total_delivered();
        let expected = delivered + self.reliable.lost + self.unreliable.lost;
        (expected > 0).then(|| delivered as f64 / expected as f64)
    }
}

/// Running delivery statistics plus the records awaiting a flush.
///
/// Totals are folded in as events arrive, so [`TrackingStore::flush_to`]
/// can release the records it has written. A store built with
/// [`TrackingStore::without_log`] keeps the totals only.
#[derive(Debug)]
pub struct TrackingStore {
    stats: DeliveryStats,
    /// (sum, count) of delivered latencies, reliable then unreliable.
    latency: [(u64, u64); 2],
    /// Lowest unreliable sequence number not yet delivered or counted lost.
    next_unreliable: SeqNum,
    keep_log: bool,
    sent: Vec<SentRecord>,
    received: Vec<ReceivedRecord>,
}

impl Default for TrackingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingStore {
    /// Create an empty store that buffers records for [`TrackingStore::flush_to`].
    pub fn new() -> Self {
        Self {
            stats: DeliveryStats::default(),
            latency: [(0, 0); 2],
            next_unreliable: SeqNum::ZERO,
            keep_log: true,
            sent: Vec::new(),
            received: Vec::new(),
        }
    }

    /// Create a store that only maintains totals.
    pub fn without_log() -> Self {
        Self {
            keep_log: false,
            ..Self::new()
        }
    }

    /// Send-side records not yet flushed.
    pub fn sent(&self) -> &[SentRecord] {
        &self.sent
    }

    /// Receive-side records not yet flushed.
    pub fn received(&self) -> &[ReceivedRecord] {
        &self.received
    }

    /// Record a send-side event.
    pub fn record_sent(&mut self, channel: Channel, seq: SeqNum, event: SentEvent) {
        let totals = self.stats.channel_mut(channel);
        match event {
            SentEvent::Sent => totals.sent += 1,
            SentEvent::Retransmitted { .. } => totals.retransmissions += 1,
            SentEvent::Acknowledged { .. } => totals.acknowledged += 1,
            SentEvent::Abandoned => totals.abandoned += 1,
        }

        if self.keep_log {
            self.sent.push(SentRecord {
                seq,
                channel,
                reliable: channel.is_reliable(),
                timestamp_ms: unix_millis(),
                event,
            });
        }
    }

    /// Record a receive-side event.
    ///
    /// Reliable losses are the gaps abandoned by the skip timer. Unreliable
    /// losses are inferred from forward jumps in the arrival sequence,
    /// starting from sequence number 0, so a packet that arrives after a
    /// later one is still counted as lost.
    pub fn record_received(&mut self, channel: Channel, seq: SeqNum, event: ReceivedEvent) {
        match event {
            ReceivedEvent::Delivered { latency_ms } => {
                self.stats.channel_mut(channel).delivered += 1;
                let (sum, count) = &mut self.latency[usize::from(!channel.is_reliable())];
                *sum += u64::from(latency_ms);
                *count += 1;

                if channel == Channel::Unreliable && !seq.precedes(self.next_unreliable) {
                    for offset in 0..seq.distance_from(self.next_unreliable) {
                        self.stats.lost_packets.push(LostPacket {
                            channel,
                            seq: self.next_unreliable.add(offset),
                        });
                        self.stats.unreliable.lost += 1;
                    }
                    self.next_unreliable = seq.next();
                }
            }
            ReceivedEvent::Duplicate => self.stats.channel_mut(channel).duplicates += 1,
            ReceivedEvent::Skipped => {
                self.stats.channel_mut(channel).lost += 1;
                self.stats.lost_packets.push(LostPacket { channel, seq });
            }
        }

        if self.keep_log {
            self.received.push(ReceivedRecord {
                seq,
                channel,
                reliable: channel.is_reliable(),
                timestamp_ms: unix_millis(),
                event,
            });
        }
    }

    /// Current totals.
    pub fn delivery_stats(&self) -> DeliveryStats {
        let mut stats = self.stats.clone();
        let [(r_sum, r_count), (u_sum, u_count)] = self.latency;
        stats.reliable.avg_latency_ms = (r_count > 0).then(|| r_sum as f64 / r_count as f64);
        stats.unreliable.avg_latency_ms = (u_count > 0).then(|| u_sum as f64 / u_count as f64);
        stats
    }

    /// Wipe the totals and every unflushed record.
    ///
    /// The unreliable arrival position survives, so packets still in flight
    /// are not counted as lost afterwards.
    pub fn clear(&mut self) {
        self.stats = DeliveryStats::default();
        self.latency = [(0, 0); 2];
        self.sent.clear();
        self.received.clear();
    }

    /// Append unflushed records to the two JSONL files in `dir` and release
    /// them.
    pub fn flush_to(&mut self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let (sent, received) = (self.sent.len(), self.received.len());
        append_jsonl(&dir.join(SENT_LOG_FILE), &self.sent)?;
        self.sent.clear();
        append_jsonl(&dir.join(RECEIVED_LOG_FILE), &self.received)?;
        self.received.clear();
        debug!(dir = %dir.display(), sent, received, "tracking flushed");
        Ok(())
    }
}

impl DeliveryStats {
    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelStats {
        match channel {
            Channel::Reliable => &mut self.reliable,
            Channel::Unreliable => &mut self.unreliable,
        }
    }
}

fn append_jsonl<T: Serialize>(path: &Path, records: &[T]) -> io::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("hudp-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_sender_stats() {
        let mut store = TrackingStore::new();
        for seq in 0..4u16 {
            store.record_sent(Channel::Reliable, seq.into(), SentEvent::Sent);
        }
        store.record_sent(Channel::Reliable, SeqNum::new(2), SentEvent::Retransmitted { attempt: 1 });
        for seq in [0u16, 1, 2] {
            store.record_sent(Channel::Reliable, seq.into(), SentEvent::Acknowledged { rtt_ms: 5 });
        }
        store.record_sent(Channel::Reliable, SeqNum::new(3), SentEvent::Abandoned);
        store.record_sent(Channel::Unreliable, SeqNum::new(0), SentEvent::Sent);

        let stats = store.delivery_stats();
        assert_eq!(stats.reliable.sent, 4);
        assert_eq!(stats.reliable.acknowledged, 3);
        assert_eq!(stats.reliable.retransmissions, 1);
        assert_eq!(stats.reliable.abandoned, 1);
        assert_eq!(stats.reliable.ack_ratio(), Some(0.75));
        assert_eq!(stats.unreliable.sent, 1);
        assert_eq!(stats.total_sent(), 5);
    }

    #[test]
    fn test_receiver_stats() {
        let mut store = TrackingStore::new();
        for seq in [0u16, 1, 3] {
            store.record_received(Channel::Reliable, seq.into(), ReceivedEvent::Delivered { latency_ms: 10 });
        }
        store.record_received(Channel::Reliable, SeqNum::new(2), ReceivedEvent::Skipped);
        store.record_received(Channel::Reliable, SeqNum::new(1), ReceivedEvent::Duplicate);

        let stats = store.delivery_stats();
        assert_eq!(stats.reliable.delivered, 3);
        assert_eq!(stats.reliable.lost, 1);
        assert_eq!(stats.reliable.duplicates, 1);
        assert_eq!(stats.reliable.delivery_ratio(), Some(0.75));
        assert_eq!(stats.reliable.avg_latency_ms, Some(10.0));
        assert_eq!(
            stats.lost_packets,
            vec![LostPacket {
                channel: Channel::Reliable,
                seq: SeqNum::new(2)
            }]
        );
    }

    #[test]
    fn test_unreliable_loss_inferred_from_jumps() {
        let mut store = TrackingStore::new();
        for seq in [0u16, 1, 4, 2, 5] {
            store.record_received(
                Channel::Unreliable,
                seq.into(),
                ReceivedEvent::Delivered { latency_ms: 1 },
            );
        }

        let stats = store.delivery_stats();
        assert_eq!(stats.unreliable.delivered, 5);
        assert_eq!(stats.unreliable.lost, 2);
        let lost: Vec<u16> = stats.lost_packets.iter().map(|p| p.seq.get()).collect();
        assert_eq!(lost, vec![2, 3]);
    }

    #[test]
    fn test_unreliable_loss_before_first_arrival() {
        let mut store = TrackingStore::new();
        for seq in [3u16, 4] {
            store.record_received(
                Channel::Unreliable,
                seq.into(),
                ReceivedEvent::Delivered { latency_ms: 1 },
            );
        }

        let stats = store.delivery_stats();
        assert_eq!(stats.unreliable.delivered, 2);
        assert_eq!(stats.unreliable.lost, 3);
        let lost: Vec<u16> = stats.lost_packets.iter().map(|p| p.seq.get()).collect();
        assert_eq!(lost, vec![0, 1, 2]);
    }

    #[test]
    fn test_unreliable_loss_across_wrap() {
        let mut store = TrackingStore::new();
        store.next_unreliable = SeqNum::new(u16::MAX - 1);
        for seq in [u16::MAX - 1, 1] {
            store.record_received(
                Channel::Unreliable,
                seq.into(),
                ReceivedEvent::Delivered { latency_ms: 1 },
            );
        }

        let lost: Vec<u16> = store
            .delivery_stats()
            .lost_packets
            .iter()
            .map(|p| p.seq.get())
            .collect();
        assert_eq!(lost, vec![u16::MAX, 0]);
    }

    #[test]
    fn test_clear_keeps_unreliable_position() {
        let mut store = TrackingStore::new();
        for seq in [0u16, 1] {
            store.record_received(Channel::Unreliable, seq.into(), ReceivedEvent::Delivered { latency_ms: 1 });
        }
        store.clear();
        store.record_received(Channel::Unreliable, SeqNum::new(2), ReceivedEvent::Delivered { latency_ms: 1 });

        let stats = store.delivery_stats();
        assert_eq!(stats.unreliable.delivered, 1);
        assert_eq!(stats.unreliable.lost, 0);
    }

    #[test]
    fn test_without_log_keeps_totals_only() {
        let mut store = TrackingStore::without_log();
        store.record_sent(Channel::Reliable, SeqNum::new(0), SentEvent::Sent);
        store.record_received(Channel::Reliable, SeqNum::new(0), ReceivedEvent::Delivered { latency_ms: 4 });

        assert!(store.sent().is_empty());
        assert!(store.received().is_empty());
        let stats = store.delivery_stats();
        assert_eq!(stats.reliable.sent, 1);
        assert_eq!(stats.reliable.delivered, 1);
        assert_eq!(stats.reliable.avg_latency_ms, Some(4.0));
    }

    #[test]
    fn test_empty_ratios() {
        let stats = TrackingStore::new().delivery_stats();
        assert_eq!(stats.reliable.ack_ratio(), None);
        assert_eq!(stats.overall_delivery_ratio(), None);
        assert_eq!(stats.reliable.avg_latency_ms, None);
    }

    #[test]
    fn test_clear() {
        let mut store = TrackingStore::new();
        store.record_sent(Channel::Reliable, SeqNum::new(0), SentEvent::Sent);
        store.record_received(Channel::Unreliable, SeqNum::new(0), ReceivedEvent::Delivered { latency_ms: 0 });
        store.clear();
        assert!(store.sent().is_empty());
        assert!(store.received().is_empty());
        assert_eq!(store.delivery_stats(), DeliveryStats::default());
    }

    #[test]
    fn test_record_json_shape() {
        let record = SentRecord {
            seq: SeqNum::new(7),
            channel: Channel::Reliable,
            reliable: true,
            timestamp_ms: 1000,
            event: SentEvent::Acknowledged { rtt_ms: 12 },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "seq": 7,
                "channel": "reliable",
                "reliable": true,
                "timestamp_ms": 1000,
                "event": "acknowledged",
                "rtt_ms": 12
            })
        );
        let back: SentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_flush_appends_only_new_records() {
        let dir = temp_dir("flush");
        let mut store = TrackingStore::new();
        store.record_sent(Channel::Reliable, SeqNum::new(0), SentEvent::Sent);
        store.flush_to(&dir).unwrap();

        store.record_sent(Channel::Reliable, SeqNum::new(1), SentEvent::Sent);
        store.record_received(Channel::Unreliable, SeqNum::new(3), ReceivedEvent::Delivered { latency_ms: 2 });
        store.flush_to(&dir).unwrap();

        let sent = std::fs::read_to_string(dir.join(SENT_LOG_FILE)).unwrap();
        let lines: Vec<SentRecord> = sent
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].seq, SeqNum::new(1));

        let received = std::fs::read_to_string(dir.join(RECEIVED_LOG_FILE)).unwrap();
        assert_eq!(received.lines().count(), 1);

        // Written records are released but still counted
        assert!(store.sent().is_empty());
        assert!(store.received().is_empty());
        let stats = store.delivery_stats();
        assert_eq!(stats.reliable.sent, 2);
        assert_eq!(stats.unreliable.delivered, 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
