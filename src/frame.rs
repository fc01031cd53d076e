//! Frame encoding and decoding.
//!
//! Every datagram carries exactly one frame. All integers are big-endian
//! (network byte order).
//!
//! Data frame (reliable `0x00` / unreliable `0x01`), 9-byte header:
//! ```text
//! +--------+----------+----------------+-------------+-----------------+
//! | Tag    | Seq      | Timestamp      | Payload Len | Payload         |
//! | 1 byte | 2 bytes  | 4 bytes (ms)   | 2 bytes     | Payload Len     |
//! +--------+----------+----------------+-------------+-----------------+
//! ```
//!
//! ACK frame (`0x02`), 7 bytes:
//! ```text
//! +--------+----------+------------------+
//! | Tag    | Acked    | Timestamp Echo   |
//! | 1 byte | 2 bytes  | 4 bytes (ms)     |
//! +--------+----------+------------------+
//! ```

use serde::{Deserialize, Serialize};

use crate::core::{
    ACK_FRAME_SIZE, DATA_HEADER_SIZE, DecodeError, EncodeError, MAX_PAYLOAD_SIZE, SeqNum,
    TAG_RELIABLE_ACK, TAG_RELIABLE_DATA, TAG_UNRELIABLE_DATA,
};

/// Wire-level frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    /// Data on the reliable (Selective Repeat) channel.
    ReliableData = TAG_RELIABLE_DATA,
    /// Data on the unreliable channel.
    UnreliableData = TAG_UNRELIABLE_DATA,
    /// Acknowledgment of a reliable data frame.
    ReliableAck = TAG_RELIABLE_ACK,
}

impl ChannelType {
    /// Parse a channel type from its tag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            TAG_RELIABLE_DATA => Some(Self::ReliableData),
            TAG_UNRELIABLE_DATA => Some(Self::UnreliableData),
            TAG_RELIABLE_ACK => Some(Self::ReliableAck),
            _ => None,
        }
    }

    /// Tag byte for this channel type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Logical channel a payload travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Acknowledged, retransmitted, ordered where possible.
    Reliable,
    /// Fire-and-forget.
    Unreliable,
}

impl Channel {
    /// Whether this is the reliable channel.
    pub fn is_reliable(self) -> bool {
        matches!(self, Channel::Reliable)
    }

    /// Data-frame channel type for this channel.
    pub fn data_type(self) -> ChannelType {
        match self {
            Channel::Reliable => ChannelType::ReliableData,
            Channel::Unreliable => ChannelType::UnreliableData,
        }
    }
}

/// A data frame on either channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Channel the payload belongs to.
    pub channel: Channel,
    /// Per-channel sequence number.
    pub seq: SeqNum,
    /// Sender's wall clock in milliseconds (mod 2^32) at first transmission.
    pub timestamp: u32,
    /// Opaque application payload.
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// Create a new data frame.
    pub fn new(channel: Channel, seq: SeqNum, timestamp: u32, payload: Vec<u8>) -> Self {
        Self {
            channel,
            seq,
            timestamp,
            payload,
        }
    }
}

/// Acknowledgment of one reliable data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckFrame {
    /// Sequence number being acknowledged.
    pub seq: SeqNum,
    /// Timestamp copied from the acknowledged data frame.
    pub timestamp_echo: u32,
}

impl AckFrame {
    /// Create a new ACK frame.
    pub fn new(seq: SeqNum, timestamp_echo: u32) -> Self {
        Self {
            seq,
            timestamp_echo,
        }
    }

    /// Serialize to bytes (7 bytes).
    pub fn to_bytes(&self) -> [u8; ACK_FRAME_SIZE] {
        let mut buf = [0u8; ACK_FRAME_SIZE];
        buf[0] = TAG_RELIABLE_ACK;
        buf[1..3].copy_from_slice(&self.seq.get().to_be_bytes());
        buf[3..7].copy_from_slice(&self.timestamp_echo.to_be_bytes());
        buf
    }
}

/// Any frame that can appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Reliable or unreliable data.
    Data(DataFrame),
    /// Reliable-channel acknowledgment.
    Ack(AckFrame),
}

impl Frame {
    /// Wire-level channel type of this frame.
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Frame::Data(data) => data.channel.data_type(),
            Frame::Ack(_) => ChannelType::ReliableAck,
        }
    }

    /// Sequence number carried by this frame.
    pub fn seq(&self) -> SeqNum {
        match self {
            Frame::Data(data) => data.seq,
            Frame::Ack(ack) => ack.seq,
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

impl From<AckFrame> for Frame {
    fn from(frame: AckFrame) -> Self {
        Frame::Ack(frame)
    }
}

/// Encode a data frame into a datagram.
pub fn encode_data(frame: &DataFrame) -> Result<Vec<u8>, EncodeError> {
    let len = frame.payload.len();
    if len > MAX_PAYLOAD_SIZE {
        return Err(EncodeError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(DATA_HEADER_SIZE + len);
    buf.push(frame.channel.data_type().as_byte());
    buf.extend_from_slice(&frame.seq.get().to_be_bytes());
    buf.extend_from_slice(&frame.timestamp.to_be_bytes());
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    Ok(buf)
}

/// Encode any frame into a datagram.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, EncodeError> {
    match frame {
        Frame::Data(data) => encode_data(data),
        Frame::Ack(ack) => Ok(ack.to_bytes().to_vec()),
    }
}

/// Decode a datagram into a frame.
///
/// Never panics: every malformed input maps to a [`DecodeError`].
pub fn decode(bytes: &[u8]) -> Result<Frame, DecodeError> {
    let Some(&tag) = bytes.first() else {
        return Err(DecodeError::TooShort {
            expected: ACK_FRAME_SIZE,
            actual: 0,
        });
    };

    let channel = match ChannelType::from_byte(tag).ok_or(DecodeError::UnknownChannel(tag))? {
        ChannelType::ReliableAck => return decode_ack(bytes).map(Frame::Ack),
        ChannelType::ReliableData => Channel::Reliable,
        ChannelType::UnreliableData => Channel::Unreliable,
    };

    if bytes.len() < DATA_HEADER_SIZE {
        return Err(DecodeError::TooShort {
            expected: DATA_HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let seq = SeqNum::new(u16::from_be_bytes([bytes[1], bytes[2]]));
    let timestamp = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
    let payload_len = u16::from_be_bytes([bytes[7], bytes[8]]) as usize;

    let payload = &bytes[DATA_HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(DecodeError::PayloadLengthMismatch {
            expected: payload_len,
            actual: payload.len(),
        });
    }

    Ok(Frame::Data(DataFrame::new(
        channel,
        seq,
        timestamp,
        payload.to_vec(),
    )))
}

fn decode_ack(bytes: &[u8]) -> Result<AckFrame, DecodeError> {
    if bytes.len() != ACK_FRAME_SIZE {
        return Err(if bytes.len() < ACK_FRAME_SIZE {
            DecodeError::TooShort {
                expected: ACK_FRAME_SIZE,
                actual: bytes.len(),
            }
        } else {
            DecodeError::PayloadLengthMismatch {
                expected: 0,
                actual: bytes.len() - ACK_FRAME_SIZE,
            }
        });
    }

    Ok(AckFrame {
        seq: SeqNum::new(u16::from_be_bytes([bytes[1], bytes[2]])),
        timestamp_echo: u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_type_roundtrip() {
        for t in [
            ChannelType::ReliableData,
            ChannelType::UnreliableData,
            ChannelType::ReliableAck,
        ] {
            assert_eq!(ChannelType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(ChannelType::from_byte(0x03), None);
        assert_eq!(ChannelType::from_byte(0xFF), None);
    }

    #[test]
    fn test_data_frame_layout() {
        let frame = DataFrame::new(Channel::Reliable, SeqNum::new(0x0102), 0x0A0B0C0D, b"hi".to_vec());
        let bytes = encode_data(&frame).unwrap();

        assert_eq!(bytes, hex::decode("0001020a0b0c0d00026869").unwrap());
        assert_eq!(bytes.len(), DATA_HEADER_SIZE + 2);
    }

    #[test]
    fn test_ack_frame_layout() {
        let ack = AckFrame::new(SeqNum::new(0xFFFE), 0x01020304);
        assert_eq!(ack.to_bytes().to_vec(), hex::decode("02fffe01020304").unwrap());
    }

    #[test]
    fn test_roundtrip() {
        let frames = [
            Frame::Data(DataFrame::new(Channel::Reliable, SeqNum::new(0), 0, vec![])),
            Frame::Data(DataFrame::new(
                Channel::Unreliable,
                SeqNum::new(65535),
                u32::MAX,
                vec![0xAB; MAX_PAYLOAD_SIZE],
            )),
            Frame::Ack(AckFrame::new(SeqNum::new(31), 123_456)),
        ];

        for frame in frames {
            let bytes = encode(&frame).unwrap();
            assert_eq!(decode(&bytes).unwrap(), frame);
            // Deterministic encoding
            assert_eq!(encode(&frame).unwrap(), bytes);
        }
    }

    #[test]
    fn test_channel_type_of_frame() {
        let data = Frame::from(DataFrame::new(Channel::Unreliable, SeqNum::new(4), 0, vec![1]));
        assert_eq!(data.channel_type(), ChannelType::UnreliableData);
        assert_eq!(data.seq(), SeqNum::new(4));

        let ack = Frame::from(AckFrame::new(SeqNum::new(9), 0));
        assert_eq!(ack.channel_type(), ChannelType::ReliableAck);
    }

    #[test]
    fn test_encode_payload_too_large() {
        let frame = DataFrame::new(
            Channel::Reliable,
            SeqNum::ZERO,
            0,
            vec![0; MAX_PAYLOAD_SIZE + 1],
        );
        assert_eq!(
            encode_data(&frame),
            Err(EncodeError::PayloadTooLarge {
                size: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE,
            })
        );
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(
            decode(&[]),
            Err(DecodeError::TooShort { actual: 0, .. })
        ));
    }

    #[test]
    fn test_decode_unknown_channel() {
        assert_eq!(
            decode(&[0x7F, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(DecodeError::UnknownChannel(0x7F))
        );
    }

    #[test]
    fn test_decode_truncated_header() {
        assert_eq!(
            decode(&[TAG_RELIABLE_DATA, 0, 1, 0]),
            Err(DecodeError::TooShort {
                expected: DATA_HEADER_SIZE,
                actual: 4,
            })
        );
        assert_eq!(
            decode(&[TAG_RELIABLE_ACK, 0, 1]),
            Err(DecodeError::TooShort {
                expected: ACK_FRAME_SIZE,
                actual: 3,
            })
        );
    }

    #[test]
    fn test_decode_length_mismatch() {
        let frame = DataFrame::new(Channel::Reliable, SeqNum::new(1), 0, b"abcd".to_vec());
        let bytes = encode_data(&frame).unwrap();

        // Truncated payload
        assert_eq!(
            decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::PayloadLengthMismatch {
                expected: 4,
                actual: 3,
            })
        );

        // Trailing garbage
        let mut padded = bytes.clone();
        padded.push(0);
        assert_eq!(
            decode(&padded),
            Err(DecodeError::PayloadLengthMismatch {
                expected: 4,
                actual: 5,
            })
        );

        let mut ack = AckFrame::new(SeqNum::new(1), 0).to_bytes().to_vec();
        ack.push(0);
        assert!(matches!(
            decode(&ack),
            Err(DecodeError::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_arbitrary_bytes_never_panics() {
        // Deterministic pseudo-random datagrams of every small length
        let mut state = 0x2545_F491u32;
        for len in 0..64 {
            for _ in 0..32 {
                let bytes: Vec<u8> = (0..len)
                    .map(|_| {
                        state ^= state << 13;
                        state ^= state >> 17;
                        state ^= state << 5;
                        state as u8
                    })
                    .collect();
                let _ = decode(&bytes);
            }
        }
    }
}
