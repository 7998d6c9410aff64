//! Wire format encoding and decoding.
//!
//! Every MQTT-SN frame starts with a length prefix and a message type:
//! ```text
//! short form (total <= 255)        long form (total <= 65535)
//! ┌────────┬──────────┬────────┐   ┌──────┬───────────┬──────────┬────────┐
//! │ Length │ Msg Type │ Fields │   │ 0x01 │ Length    │ Msg Type │ Fields │
//! │ 1 byte │ 1 byte   │ ...    │   │      │ uint16 BE │ 1 byte   │ ...    │
//! └────────┴──────────┴────────┘   └──────┴───────────┴──────────┴────────┘
//! ```
//!
//! The length counts the whole frame, prefix included. All multi-byte
//! integers are Big Endian.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::{MqttsnError, Result};

/// Largest total length representable by the 1-byte prefix.
pub const SHORT_LENGTH_MAX: usize = 255;

/// Largest total length representable at all.
pub const MAX_FRAME_LENGTH: usize = 0xFFFF;

/// First byte announcing the 3-byte length prefix.
pub const LONG_LENGTH_MARKER: u8 = 0x01;

/// Protocol id carried by CONNECT.
pub const PROTOCOL_ID: u8 = 0x01;

/// Largest valid topic id (0xFFFF is reserved).
pub const MAX_TOPIC_ID: u16 = 0xFFFE;

/// Maximum client id length in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Message type identifiers.
pub mod msg_type {
    pub const ADVERTISE: u8 = 0x00;
    pub const SEARCHGW: u8 = 0x01;
    pub const GWINFO: u8 = 0x02;
    pub const CONNECT: u8 = 0x04;
    pub const CONNACK: u8 = 0x05;
    pub const WILLTOPICREQ: u8 = 0x06;
    pub const WILLTOPIC: u8 = 0x07;
    pub const WILLMSGREQ: u8 = 0x08;
    pub const WILLMSG: u8 = 0x09;
    pub const REGISTER: u8 = 0x0A;
    pub const REGACK: u8 = 0x0B;
    pub const PUBLISH: u8 = 0x0C;
    pub const PUBACK: u8 = 0x0D;
    pub const PUBCOMP: u8 = 0x0E;
    pub const PUBREC: u8 = 0x0F;
    pub const PUBREL: u8 = 0x10;
    pub const SUBSCRIBE: u8 = 0x12;
    pub const SUBACK: u8 = 0x13;
    pub const UNSUBSCRIBE: u8 = 0x14;
    pub const UNSUBACK: u8 = 0x15;
    pub const PINGREQ: u8 = 0x16;
    pub const PINGRESP: u8 = 0x17;
    pub const DISCONNECT: u8 = 0x18;
    pub const WILLTOPICUPD: u8 = 0x1A;
    pub const WILLTOPICRESP: u8 = 0x1B;
    pub const WILLMSGUPD: u8 = 0x1C;
    pub const WILLMSGRESP: u8 = 0x1D;
}

/// Flag bits shared by CONNECT, WILLTOPIC, PUBLISH, SUBSCRIBE and friends.
pub mod flags {
    /// Retransmitted message.
    pub const DUP: u8 = 0b1000_0000;
    /// QoS bits (6-5).
    pub const QOS_MASK: u8 = 0b0110_0000;
    /// Shift of the QoS bits.
    pub const QOS_SHIFT: u8 = 5;
    /// Retain flag.
    pub const RETAIN: u8 = 0b0001_0000;
    /// Will information follows CONNECT.
    pub const WILL: u8 = 0b0000_1000;
    /// Clean session on CONNECT.
    pub const CLEAN_SESSION: u8 = 0b0000_0100;
    /// Topic id type bits (1-0).
    pub const TOPIC_ID_TYPE_MASK: u8 = 0b0000_0011;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Quality of service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// QoS -1: publish without connection, registration or acknowledgement.
    NoGwPublish,
    /// QoS 0.
    AtMostOnce,
    /// QoS 1.
    AtLeastOnce,
    /// QoS 2.
    ExactlyOnce,
}

impl QoS {
    /// Two-bit wire encoding.
    pub fn bits(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0b00,
            QoS::AtLeastOnce => 0b01,
            QoS::ExactlyOnce => 0b10,
            QoS::NoGwPublish => 0b11,
        }
    }

    /// Decode from the two-bit wire encoding.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => QoS::AtMostOnce,
            0b01 => QoS::AtLeastOnce,
            0b10 => QoS::ExactlyOnce,
            _ => QoS::NoGwPublish,
        }
    }

    /// Whether the gateway acknowledges a publish at this level.
    #[inline]
    pub fn is_acknowledged(self) -> bool {
        matches!(self, QoS::AtLeastOnce | QoS::ExactlyOnce)
    }
}

/// How the topic id field of a message is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicIdType {
    /// Id negotiated with REGISTER / REGACK (or a topic name in SUBSCRIBE).
    Normal,
    /// Id provisioned out of band.
    Predefined,
    /// Two-character topic name packed in the id field.
    ShortName,
}

impl TopicIdType {
    pub fn bits(self) -> u8 {
        match self {
            TopicIdType::Normal => 0b00,
            TopicIdType::Predefined => 0b01,
            TopicIdType::ShortName => 0b10,
        }
    }

    /// Returns `None` for the reserved value.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & flags::TOPIC_ID_TYPE_MASK {
            0b00 => Some(TopicIdType::Normal),
            0b01 => Some(TopicIdType::Predefined),
            0b10 => Some(TopicIdType::ShortName),
            _ => None,
        }
    }
}

/// Return code carried by acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Accepted,
    Congestion,
    InvalidTopicId,
    NotSupported,
}

impl ReturnCode {
    pub fn to_byte(self) -> u8 {
        match self {
            ReturnCode::Accepted => 0,
            ReturnCode::Congestion => 1,
            ReturnCode::InvalidTopicId => 2,
            ReturnCode::NotSupported => 3,
        }
    }

    /// Decode a return code, rejecting values outside 0..=3.
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ReturnCode::Accepted),
            1 => Ok(ReturnCode::Congestion),
            2 => Ok(ReturnCode::InvalidTopicId),
            3 => Ok(ReturnCode::NotSupported),
            other => Err(MqttsnError::Invalid(format!(
                "Return code {} out of range",
                other
            ))),
        }
    }
}

/// Flags byte with typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(pub u8);

impl Flags {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_dup(self, dup: bool) -> Self {
        self.set(flags::DUP, dup)
    }

    pub fn with_qos(self, qos: QoS) -> Self {
        Self((self.0 & !flags::QOS_MASK) | (qos.bits() << flags::QOS_SHIFT))
    }

    pub fn with_retain(self, retain: bool) -> Self {
        self.set(flags::RETAIN, retain)
    }

    pub fn with_will(self, will: bool) -> Self {
        self.set(flags::WILL, will)
    }

    pub fn with_clean_session(self, clean: bool) -> Self {
        self.set(flags::CLEAN_SESSION, clean)
    }

    pub fn with_topic_id_type(self, kind: TopicIdType) -> Self {
        Self((self.0 & !flags::TOPIC_ID_TYPE_MASK) | kind.bits())
    }

    fn set(self, bit: u8, on: bool) -> Self {
        if on {
            Self(self.0 | bit)
        } else {
            Self(self.0 & !bit)
        }
    }

    #[inline]
    pub fn dup(&self) -> bool {
        flags::has_flag(self.0, flags::DUP)
    }

    #[inline]
    pub fn qos(&self) -> QoS {
        QoS::from_bits((self.0 & flags::QOS_MASK) >> flags::QOS_SHIFT)
    }

    #[inline]
    pub fn retain(&self) -> bool {
        flags::has_flag(self.0, flags::RETAIN)
    }

    #[inline]
    pub fn will(&self) -> bool {
        flags::has_flag(self.0, flags::WILL)
    }

    #[inline]
    pub fn clean_session(&self) -> bool {
        flags::has_flag(self.0, flags::CLEAN_SESSION)
    }

    #[inline]
    pub fn topic_id_type(&self) -> Option<TopicIdType> {
        TopicIdType::from_bits(self.0)
    }
}

/// Decoded frame header: length prefix plus message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame length, prefix included.
    pub length: usize,
    /// Size of the length prefix (1 or 3).
    pub prefix_len: usize,
    /// Message type identifier.
    pub msg_type: u8,
}

impl Header {
    /// Build the header for a body of `body_len` bytes.
    ///
    /// Chooses the short prefix whenever the whole frame fits in 255 bytes.
    pub fn for_body(msg_type: u8, body_len: usize) -> Result<Self> {
        let short_total = body_len + 2;
        if short_total <= SHORT_LENGTH_MAX {
            return Ok(Self {
                length: short_total,
                prefix_len: 1,
                msg_type,
            });
        }

        let long_total = body_len + 4;
        if long_total > MAX_FRAME_LENGTH {
            return Err(MqttsnError::EncodingTooLarge { size: long_total });
        }

        Ok(Self {
            length: long_total,
            prefix_len: 3,
            msg_type,
        })
    }

    /// Size of prefix plus type byte.
    #[inline]
    pub fn header_len(&self) -> usize {
        self.prefix_len + 1
    }

    /// Size of the type-specific fields.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.length.saturating_sub(self.header_len())
    }

    /// Encode prefix and type id into `buf`.
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        if self.prefix_len == 1 {
            buf.put_u8(self.length as u8);
        } else {
            buf.put_u8(LONG_LENGTH_MARKER);
            buf.put_u16(self.length as u16);
        }
        buf.put_u8(self.msg_type);
    }

    /// Decode the header from the start of `buf`.
    ///
    /// Returns `None` if the buffer does not yet hold the whole header.
    /// The declared length is not checked; see [`Header::validate`].
    ///
    /// # Example
    ///
    /// ```
    /// use mqttsn_client::protocol::{Header, msg_type};
    ///
    /// let header = Header::decode(&[0x03, msg_type::CONNACK, 0x00]).unwrap();
    /// assert_eq!(header.length, 3);
    /// assert_eq!(header.msg_type, msg_type::CONNACK);
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let first = *buf.first()?;
        if first == LONG_LENGTH_MARKER {
            if buf.len() < 4 {
                return None;
            }
            Some(Self {
                length: u16::from_be_bytes([buf[1], buf[2]]) as usize,
                prefix_len: 3,
                msg_type: buf[3],
            })
        } else {
            if buf.len() < 2 {
                return None;
            }
            Some(Self {
                length: first as usize,
                prefix_len: 1,
                msg_type: buf[1],
            })
        }
    }

    /// Validate the declared length against the header itself.
    pub fn validate(&self) -> Result<()> {
        if self.length < self.header_len() {
            return Err(MqttsnError::Invalid(format!(
                "Declared length {} shorter than header",
                self.length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_prefix_selected_up_to_255() {
        let header = Header::for_body(msg_type::PUBLISH, 253).unwrap();
        assert_eq!(header.prefix_len, 1);
        assert_eq!(header.length, 255);

        let header = Header::for_body(msg_type::PUBLISH, 254).unwrap();
        assert_eq!(header.prefix_len, 3);
        assert_eq!(header.length, 258);
    }

    #[test]
    fn test_encoding_too_large() {
        let result = Header::for_body(msg_type::PUBLISH, MAX_FRAME_LENGTH - 3);
        assert!(matches!(
            result,
            Err(MqttsnError::EncodingTooLarge { size }) if size == MAX_FRAME_LENGTH + 1
        ));
        assert!(Header::for_body(msg_type::PUBLISH, MAX_FRAME_LENGTH - 4).is_ok());
    }

    #[test]
    fn test_long_prefix_big_endian() {
        let header = Header::for_body(msg_type::WILLMSG, 0x0200).unwrap();
        let mut buf = Vec::new();
        header.encode_into(&mut buf);

        assert_eq!(buf, vec![0x01, 0x02, 0x04, msg_type::WILLMSG]);
        assert_eq!(Header::decode(&buf), Some(header));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode(&[]).is_none());
        assert!(Header::decode(&[0x05]).is_none());
        assert!(Header::decode(&[0x01, 0x01, 0x00]).is_none());
    }

    #[test]
    fn test_validate_rejects_short_length() {
        let header = Header::decode(&[0x01, 0x00]).unwrap_or(Header {
            length: 1,
            prefix_len: 1,
            msg_type: 0,
        });
        assert!(header.validate().is_err());

        let zero = Header::decode(&[0x00, msg_type::PINGRESP]).unwrap();
        assert!(zero.validate().is_err());

        let ok = Header::decode(&[0x02, msg_type::PINGRESP]).unwrap();
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_flags_accessors() {
        let f = Flags::new()
            .with_dup(true)
            .with_qos(QoS::ExactlyOnce)
            .with_retain(true)
            .with_topic_id_type(TopicIdType::ShortName);

        assert_eq!(f.0, 0b1101_0010);
        assert!(f.dup());
        assert_eq!(f.qos(), QoS::ExactlyOnce);
        assert!(f.retain());
        assert!(!f.will());
        assert!(!f.clean_session());
        assert_eq!(f.topic_id_type(), Some(TopicIdType::ShortName));
    }

    #[test]
    fn test_qos_minus_one_bits() {
        let f = Flags::new().with_qos(QoS::NoGwPublish);
        assert_eq!(f.0 & flags::QOS_MASK, 0b0110_0000);
        assert_eq!(f.qos(), QoS::NoGwPublish);
        assert!(!QoS::NoGwPublish.is_acknowledged());
        assert!(QoS::AtLeastOnce.is_acknowledged());
    }

    #[test]
    fn test_reserved_topic_id_type() {
        assert_eq!(TopicIdType::from_bits(0b11), None);
        assert_eq!(Flags(0b11).topic_id_type(), None);
    }

    #[test]
    fn test_return_code_range() {
        for value in 0..=3u8 {
            assert_eq!(ReturnCode::from_byte(value).unwrap().to_byte(), value);
        }
        assert!(ReturnCode::from_byte(4)
            .unwrap_err()
            .to_string()
            .contains("out of range"));
    }
}
