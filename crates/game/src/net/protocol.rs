use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7777;
pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 1200;
pub const HEADER_SIZE: usize = 12;
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

pub const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(30);
/// Roughly five seconds of retries at the retransmit interval.
pub const MAX_RETRANSMITS: u32 = 170;
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sequence number carried by payload-less acknowledgment packets. Data
/// sequences start at 1.
pub const ACK_ONLY_SEQUENCE: u32 = 0;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub sequence: u32,
    pub ack: u32,
    pub payload_len: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32, ack: u32, payload_len: u32) -> Self {
        Self {
            sequence,
            ack,
            payload_len,
        }
    }

    pub fn is_ack_only(&self) -> bool {
        self.sequence == ACK_ONLY_SEQUENCE
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.extend_from_slice(&self.payload_len.to_be_bytes());
    }

    fn read(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                needed: HEADER_SIZE,
                got: data.len(),
            });
        }
        let word = |i: usize| u32::from_be_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Ok(Self {
            sequence: word(0),
            ack: word(4),
            payload_len: word(8),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit")]
    Oversized(usize),
    #[error("{0} trailing bytes after payload")]
    Trailing(usize),
}

impl Packet {
    pub fn new(sequence: u32, ack: u32, payload: Vec<u8>) -> Self {
        let header = PacketHeader::new(sequence, ack, payload.len() as u32);
        Self { header, payload }
    }

    pub fn ack_only(ack: u32) -> Self {
        Self::new(ACK_ONLY_SEQUENCE, ack, Vec::new())
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(PacketError::Oversized(self.payload.len()));
        }
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        self.header.write(&mut out);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::read(data)?;
        let len = header.payload_len as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(PacketError::Oversized(len));
        }
        let body = &data[HEADER_SIZE..];
        if body.len() < len {
            return Err(PacketError::Truncated {
                needed: HEADER_SIZE + len,
                got: data.len(),
            });
        }
        if body.len() > len {
            return Err(PacketError::Trailing(body.len() - len));
        }
        Ok(Self {
            header,
            payload: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::new(7, 3, b"hello".to_vec());

        let serialized = packet.serialize().unwrap();
        assert_eq!(serialized.len(), HEADER_SIZE + 5);
        assert_eq!(&serialized[..4], &7u32.to_be_bytes());
        assert_eq!(&serialized[4..8], &3u32.to_be_bytes());
        assert_eq!(&serialized[8..12], &5u32.to_be_bytes());

        let deserialized = Packet::deserialize(&serialized).unwrap();
        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_ack_only_packet() {
        let packet = Packet::ack_only(41);
        let deserialized = Packet::deserialize(&packet.serialize().unwrap()).unwrap();
        assert!(deserialized.header.is_ack_only());
        assert_eq!(deserialized.header.ack, 41);
        assert!(deserialized.payload.is_empty());
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let packet = Packet::new(1, 0, vec![1, 2, 3, 4]);
        let serialized = packet.serialize().unwrap();

        assert!(matches!(
            Packet::deserialize(&serialized[..serialized.len() - 1]),
            Err(PacketError::Truncated { .. })
        ));
        assert!(matches!(
            Packet::deserialize(&serialized[..5]),
            Err(PacketError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut serialized = Packet::new(1, 0, vec![9]).serialize().unwrap();
        serialized.push(0);
        assert_eq!(
            Packet::deserialize(&serialized),
            Err(PacketError::Trailing(1))
        );
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let packet = Packet::new(1, 0, vec![0; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(packet.serialize(), Err(PacketError::Oversized(_))));
    }
}
