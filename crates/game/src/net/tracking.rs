use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use super::protocol::{sequence_greater_than, ACK_ONLY_SEQUENCE, HEADER_SIZE};

/// A sent data packet that the peer has not acknowledged yet.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub sequence: u32,
    pub datagram: Vec<u8>,
    pub sent_at: Instant,
    pub retries: u32,
}

/// Outcome of a retransmission pass.
#[derive(Debug, Default)]
pub struct RetransmitPass {
    pub datagrams: Vec<Vec<u8>>,
    pub exhausted: Option<u32>,
}

/// Outbound window: unacknowledged packets ordered by sequence.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingSend>,
    srtt: f32,
    rtt_var: f32,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AckTracker {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            srtt: 100.0,
            rtt_var: 50.0,
        }
    }

    pub fn track_packet(&mut self, sequence: u32, datagram: Vec<u8>, now: Instant) {
        self.pending.push_back(PendingSend {
            sequence,
            datagram,
            sent_at: now,
            retries: 0,
        });
    }

    /// Cumulative acknowledgment: everything at or below `ack` is released.
    /// Returns the number of packets released.
    pub fn process_ack(&mut self, ack: u32, now: Instant) -> usize {
        if ack == ACK_ONLY_SEQUENCE {
            return 0;
        }

        let mut released = 0;
        while let Some(front) = self.pending.front() {
            if sequence_greater_than(front.sequence, ack) {
                break;
            }
            if let Some(done) = self.pending.pop_front() {
                // Karn: retransmitted packets give ambiguous samples.
                if done.retries == 0 {
                    let rtt = now.saturating_duration_since(done.sent_at).as_secs_f32() * 1000.0;
                    self.update_rtt(rtt);
                }
                released += 1;
            }
        }
        released
    }

    /// Resends every packet whose last transmission is at least `interval`
    /// old. The stored datagram's ack field is refreshed to `current_ack`.
    pub fn retransmit_due(
        &mut self,
        now: Instant,
        interval: Duration,
        max_retries: u32,
        current_ack: u32,
    ) -> RetransmitPass {
        let mut pass = RetransmitPass::default();

        for pending in &mut self.pending {
            if now.saturating_duration_since(pending.sent_at) < interval {
                continue;
            }
            if pending.retries >= max_retries {
                pass.exhausted = Some(pending.sequence);
                break;
            }
            if pending.datagram.len() >= HEADER_SIZE {
                pending.datagram[4..8].copy_from_slice(&current_ack.to_be_bytes());
            }
            pending.retries += 1;
            pending.sent_at = now;
            pass.datagrams.push(pending.datagram.clone());
        }

        pass
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.len()
    }

    pub fn oldest_unacked(&self) -> Option<&PendingSend> {
        self.pending.front()
    }
}

/// What happened to an arriving data packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// New packet, stored for in-order delivery.
    Accepted,
    /// At or below the cursor, or already buffered.
    Duplicate,
    /// Too far beyond the cursor to buffer; the sender will retransmit.
    OutOfWindow,
}

/// How far past the receive cursor a packet may land and still be buffered.
pub const RECEIVE_WINDOW: u32 = 1024;

/// Receive side: tracks the highest contiguous sequence (the cursor) and
/// buffers out-of-order payloads until the gap before them fills.
#[derive(Debug)]
pub struct ReceiveTracker<T> {
    cursor: u32,
    held: BTreeMap<u32, T>,
    max_held: u32,
}

impl<T> Default for ReceiveTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReceiveTracker<T> {
    pub fn new() -> Self {
        Self {
            cursor: ACK_ONLY_SEQUENCE,
            held: BTreeMap::new(),
            max_held: RECEIVE_WINDOW,
        }
    }

    /// Whether `sequence` is new, without storing anything.
    pub fn is_new(&self, sequence: u32) -> bool {
        sequence != ACK_ONLY_SEQUENCE
            && sequence_greater_than(sequence, self.cursor)
            && !self.held.contains_key(&sequence.wrapping_sub(self.cursor))
    }

    pub fn record_received(&mut self, sequence: u32, payload: T) -> Arrival {
        if sequence == ACK_ONLY_SEQUENCE || !sequence_greater_than(sequence, self.cursor) {
            return Arrival::Duplicate;
        }

        // Keyed by distance from the cursor so ordering survives wraparound.
        let distance = sequence.wrapping_sub(self.cursor);
        if distance > self.max_held {
            return Arrival::OutOfWindow;
        }
        if self.held.contains_key(&distance) {
            return Arrival::Duplicate;
        }

        self.held.insert(distance, payload);
        Arrival::Accepted
    }

    /// Payloads that became contiguous, in sequence order.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        let mut advanced = 0u32;

        while let Some(payload) = self.held.remove(&(advanced + 1)) {
            ready.push(payload);
            advanced += 1;
        }

        if advanced > 0 {
            self.cursor = self.cursor.wrapping_add(advanced);
            self.held = std::mem::take(&mut self.held)
                .into_iter()
                .map(|(distance, payload)| (distance - advanced, payload))
                .collect();
        }

        ready
    }

    /// Highest contiguous sequence received; what goes in outgoing acks.
    pub fn ack(&self) -> u32 {
        self.cursor
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datagram(sequence: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; HEADER_SIZE];
        bytes[..4].copy_from_slice(&sequence.to_be_bytes());
        bytes
    }

    #[test]
    fn test_receive_tracker_in_order() {
        let mut tracker = ReceiveTracker::new();

        assert_eq!(tracker.record_received(1, vec![1]), Arrival::Accepted);
        assert_eq!(tracker.record_received(2, vec![2]), Arrival::Accepted);
        assert_eq!(tracker.drain_ready(), vec![vec![1], vec![2]]);
        assert_eq!(tracker.ack(), 2);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3, vec![3]);
        tracker.record_received(2, vec![2]);
        assert!(tracker.drain_ready().is_empty());
        assert_eq!(tracker.ack(), 0);

        tracker.record_received(1, vec![1]);
        assert_eq!(tracker.drain_ready(), vec![vec![1], vec![2], vec![3]]);
        assert_eq!(tracker.ack(), 3);
        assert_eq!(tracker.held_count(), 0);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert_eq!(tracker.record_received(1, "a"), Arrival::Accepted);
        assert_eq!(tracker.record_received(3, "c"), Arrival::Accepted);
        assert!(!tracker.is_new(3));
        assert!(tracker.is_new(2));
        assert_eq!(tracker.record_received(3, "c"), Arrival::Duplicate);
        tracker.drain_ready();
        assert_eq!(tracker.record_received(1, "a"), Arrival::Duplicate);
        assert_eq!(tracker.record_received(0, "ack"), Arrival::Duplicate);
    }

    #[test]
    fn test_far_future_packet_is_not_buffered() {
        let mut tracker = ReceiveTracker::new();
        assert_eq!(
            tracker.record_received(RECEIVE_WINDOW + 5, ()),
            Arrival::OutOfWindow
        );
        assert_eq!(tracker.held_count(), 0);
    }

    #[test]
    fn test_ack_releases_cumulatively() {
        let mut tracker = AckTracker::new();
        let now = Instant::now();

        for sequence in 1..=4 {
            tracker.track_packet(sequence, datagram(sequence), now);
        }

        assert_eq!(tracker.process_ack(2, now), 2);
        assert_eq!(tracker.unacked_count(), 2);
        assert_eq!(tracker.oldest_unacked().map(|p| p.sequence), Some(3));
        assert_eq!(tracker.process_ack(2, now), 0);
        assert_eq!(tracker.process_ack(0, now), 0);
    }

    #[test]
    fn test_ack_tracker_rtt() {
        let mut tracker = AckTracker::new();
        let start = Instant::now();

        tracker.track_packet(1, datagram(1), start);
        tracker.process_ack(1, start + Duration::from_millis(10));

        assert!(tracker.srtt() < 100.0);
        assert!(tracker.srtt() > 0.0);
    }

    #[test]
    fn test_retransmit_after_interval() {
        let mut tracker = AckTracker::new();
        let start = Instant::now();
        let interval = Duration::from_millis(30);

        tracker.track_packet(1, datagram(1), start);

        let early = tracker.retransmit_due(start + Duration::from_millis(10), interval, 3, 0);
        assert!(early.datagrams.is_empty());

        let due = tracker.retransmit_due(start + interval, interval, 3, 9);
        assert_eq!(due.datagrams.len(), 1);
        assert_eq!(&due.datagrams[0][4..8], &9u32.to_be_bytes());
        assert_eq!(tracker.oldest_unacked().map(|p| p.retries), Some(1));
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let mut tracker = AckTracker::new();
        let mut now = Instant::now();
        let interval = Duration::from_millis(30);

        tracker.track_packet(1, datagram(1), now);
        for _ in 0..2 {
            now += interval;
            let pass = tracker.retransmit_due(now, interval, 2, 0);
            assert!(pass.exhausted.is_none());
        }

        now += interval;
        let pass = tracker.retransmit_due(now, interval, 2, 0);
        assert_eq!(pass.exhausted, Some(1));
    }
}
