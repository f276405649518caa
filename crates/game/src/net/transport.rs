use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::endpoint::DatagramSocket;
use super::framer::{self, FramingError, Message};
use super::protocol::{
    Packet, PacketError, ACK_ONLY_SEQUENCE, DISCONNECT_TIMEOUT, MAX_PACKET_SIZE, MAX_RETRANSMITS,
    RETRANSMIT_INTERVAL,
};
use super::stats::NetworkStats;
use super::tracking::{AckTracker, Arrival, ReceiveTracker};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub retransmit_interval: Duration,
    pub max_retransmits: u32,
    /// Silence from the peer longer than this is a lost connection.
    pub disconnect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: RETRANSMIT_INTERVAL,
            max_retransmits: MAX_RETRANSMITS,
            disconnect_timeout: DISCONNECT_TIMEOUT,
        }
    }
}

/// Why the transport gave up on its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFailure {
    RetriesExhausted { sequence: u32, retries: u32 },
    Silent(Duration),
}

impl fmt::Display for LinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetriesExhausted { sequence, retries } => {
                write!(f, "packet {sequence} unacknowledged after {retries} retransmits")
            }
            Self::Silent(elapsed) => write!(f, "nothing heard for {:.1}s", elapsed.as_secs_f32()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("connection to {peer} lost: {reason}")]
    ConnectionLost { peer: SocketAddr, reason: LinkFailure },
}

/// Reliable, ordered message delivery to a single peer over a datagram
/// socket. Sequencing, cumulative acks, retransmission and duplicate
/// suppression live here; nothing above sees a raw packet.
pub struct Transport<S> {
    socket: S,
    peer: SocketAddr,
    config: TransportConfig,
    send_sequence: u32,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker<Message>,
    stats: NetworkStats,
    last_receive: Instant,
    recv_buffer: [u8; MAX_PACKET_SIZE],
}

impl<S: DatagramSocket> Transport<S> {
    pub fn new(socket: S, peer: SocketAddr, config: TransportConfig, now: Instant) -> Self {
        Self {
            socket,
            peer,
            config,
            send_sequence: ACK_ONLY_SEQUENCE + 1,
            ack_tracker: AckTracker::new(),
            receive_tracker: ReceiveTracker::new(),
            stats: NetworkStats::default(),
            last_receive: now,
            recv_buffer: [0u8; MAX_PACKET_SIZE],
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Applies new retransmission and liveness limits from now on.
    pub fn set_config(&mut self, config: TransportConfig) {
        self.config = config;
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn unacked_count(&self) -> usize {
        self.ack_tracker.unacked_count()
    }

    /// Highest contiguous sequence received from the peer.
    pub fn ack(&self) -> u32 {
        self.receive_tracker.ack()
    }

    /// Frames and sends `message`, keeping it for retransmission until the
    /// peer acknowledges it. Returns the sequence number it went out with.
    pub fn send(&mut self, message: &Message, now: Instant) -> Result<u32, TransportError> {
        let frame = framer::encode(message)?;
        let sequence = self.next_sequence();
        let datagram = Packet::new(sequence, self.receive_tracker.ack(), frame).serialize()?;

        self.transmit(&datagram)?;
        self.ack_tracker.track_packet(sequence, datagram, now);
        Ok(sequence)
    }

    /// Drains the socket and returns newly completed messages in order.
    pub fn receive(&mut self, now: Instant) -> Result<Vec<Message>, TransportError> {
        let mut delivered = Vec::new();
        let mut needs_ack = false;

        while let Some((size, from)) = self.socket.recv_from(&mut self.recv_buffer)? {
            if from != self.peer {
                debug!("ignoring {size} byte datagram from stranger {from}");
                continue;
            }
            let datagram = self.recv_buffer[..size].to_vec();
            needs_ack |= self.accept_datagram(&datagram, now, &mut delivered);
        }

        if needs_ack {
            self.send_ack()?;
        }
        Ok(delivered)
    }

    /// Processes a datagram that was read from the socket before this
    /// transport owned it.
    pub fn inject_datagram(
        &mut self,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Vec<Message>, TransportError> {
        let mut delivered = Vec::new();
        if self.accept_datagram(datagram, now, &mut delivered) {
            self.send_ack()?;
        }
        Ok(delivered)
    }

    /// Resends overdue packets and checks the liveness bounds.
    pub fn flush(&mut self, now: Instant) -> Result<(), TransportError> {
        let pass = self.ack_tracker.retransmit_due(
            now,
            self.config.retransmit_interval,
            self.config.max_retransmits,
            self.receive_tracker.ack(),
        );

        for datagram in &pass.datagrams {
            self.transmit(datagram)?;
            self.stats.packets_retransmitted += 1;
        }

        if let Some(sequence) = pass.exhausted {
            warn!("giving up on packet {sequence} to {}", self.peer);
            return Err(TransportError::ConnectionLost {
                peer: self.peer,
                reason: LinkFailure::RetriesExhausted {
                    sequence,
                    retries: self.config.max_retransmits,
                },
            });
        }

        let silence = now.saturating_duration_since(self.last_receive);
        if silence > self.config.disconnect_timeout {
            return Err(TransportError::ConnectionLost {
                peer: self.peer,
                reason: LinkFailure::Silent(silence),
            });
        }

        Ok(())
    }

    /// Returns true when the peer should be sent an acknowledgment.
    fn accept_datagram(&mut self, datagram: &[u8], now: Instant, out: &mut Vec<Message>) -> bool {
        let packet = match Packet::deserialize(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!("dropping bad packet from {}: {e}", self.peer);
                return false;
            }
        };

        self.last_receive = now;
        self.stats.packets_received += 1;
        self.stats.bytes_received += datagram.len() as u64;

        if self.ack_tracker.process_ack(packet.header.ack, now) > 0 {
            self.stats.rtt_ms = self.ack_tracker.srtt();
            self.stats.rtt_variance = self.ack_tracker.rtt_var();
        }

        if packet.header.is_ack_only() {
            return false;
        }

        let sequence = packet.header.sequence;
        if !self.receive_tracker.is_new(sequence) {
            self.stats.duplicates_dropped += 1;
            return true;
        }

        // Undecodable payloads are left unacknowledged so the sender's
        // retransmission delivers an intact copy.
        let message = match framer::decode(&packet.payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.framing_errors += 1;
                debug!("dropping packet {sequence} from {}: {e}", self.peer);
                return false;
            }
        };

        match self.receive_tracker.record_received(sequence, message) {
            Arrival::Accepted => {
                out.extend(self.receive_tracker.drain_ready());
                true
            }
            Arrival::Duplicate => {
                self.stats.duplicates_dropped += 1;
                true
            }
            Arrival::OutOfWindow => false,
        }
    }

    fn send_ack(&mut self) -> Result<(), TransportError> {
        let datagram = Packet::ack_only(self.receive_tracker.ack()).serialize()?;
        self.transmit(&datagram)?;
        Ok(())
    }

    fn transmit(&mut self, datagram: &[u8]) -> io::Result<()> {
        let sent = self.socket.send_to(datagram, self.peer)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += sent as u64;
        Ok(())
    }

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.send_sequence;
        self.send_sequence = match self.send_sequence.wrapping_add(1) {
            ACK_ONLY_SEQUENCE => ACK_ONLY_SEQUENCE + 1,
            next => next,
        };
        sequence
    }
}

impl<S> fmt::Debug for Transport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("peer", &self.peer)
            .field("send_sequence", &self.send_sequence)
            .field("ack", &self.receive_tracker.ack())
            .field("unacked", &self.ack_tracker.unacked_count())
            .finish()
    }
}
