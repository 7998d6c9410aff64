//! MQTT-SN message set.
//!
//! Each variant of [`Message`] carries the type-specific fields of one
//! message type as plain named fields. Encoding computes the length prefix
//! from the fields; decoding splits one frame and routes its body to the
//! per-type decoder through a [`MessageFactory`].
//!
//! # Example
//!
//! ```
//! use mqttsn_client::protocol::{Message, ReturnCode};
//!
//! let msg = Message::Regack { topic_id: 7, msg_id: 1, return_code: ReturnCode::Accepted };
//! let bytes = msg.encode().unwrap();
//! assert_eq!(bytes.len(), msg.length());
//!
//! let (decoded, consumed) = Message::decode(&bytes).unwrap();
//! assert_eq!(decoded, msg);
//! assert_eq!(consumed, bytes.len());
//! ```

use std::sync::OnceLock;

use bytes::{BufMut, Bytes};

use super::frame::{split_frame, Frame};
use super::wire_format::{
    msg_type, Flags, Header, QoS, ReturnCode, TopicIdType, MAX_TOPIC_ID, PROTOCOL_ID,
};
use crate::dispatch::{DispatchStrategy, Dispatcher};
use crate::error::{MqttsnError, Result};

/// Topic designation used by SUBSCRIBE and UNSUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicRef {
    /// Full topic name, wildcards allowed.
    Name(String),
    /// Pre-provisioned topic id.
    Predefined(u16),
    /// Two-character topic name.
    Short([u8; 2]),
}

impl TopicRef {
    pub fn id_type(&self) -> TopicIdType {
        match self {
            TopicRef::Name(_) => TopicIdType::Normal,
            TopicRef::Predefined(_) => TopicIdType::Predefined,
            TopicRef::Short(_) => TopicIdType::ShortName,
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            TopicRef::Name(name) => name.len(),
            TopicRef::Predefined(_) | TopicRef::Short(_) => 2,
        }
    }

    fn write<B: BufMut>(&self, buf: &mut B) {
        match self {
            TopicRef::Name(name) => buf.put_slice(name.as_bytes()),
            TopicRef::Predefined(id) => buf.put_u16(*id),
            TopicRef::Short(chars) => buf.put_slice(chars),
        }
    }
}

/// Will topic fields shared by WILLTOPIC and WILLTOPICUPD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillTopicFields {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
}

impl WillTopicFields {
    fn flags(&self) -> Flags {
        Flags::new().with_qos(self.qos).with_retain(self.retain)
    }
}

/// One decoded MQTT-SN message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Advertise {
        gw_id: u8,
        duration: u16,
    },
    SearchGw {
        radius: u8,
    },
    GwInfo {
        gw_id: u8,
        /// Gateway address; empty when sent by the gateway itself.
        gw_add: Bytes,
    },
    Connect {
        will: bool,
        clean_session: bool,
        duration: u16,
        client_id: String,
    },
    Connack {
        return_code: ReturnCode,
    },
    WillTopicReq,
    WillTopic {
        /// `None` encodes an empty WILLTOPIC.
        will: Option<WillTopicFields>,
    },
    WillMsgReq,
    WillMsg {
        msg: Bytes,
    },
    Register {
        topic_id: u16,
        msg_id: u16,
        topic_name: String,
    },
    Regack {
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    Publish {
        dup: bool,
        qos: QoS,
        retain: bool,
        topic_id_type: TopicIdType,
        topic_id: u16,
        msg_id: u16,
        data: Bytes,
    },
    Puback {
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    Pubcomp {
        msg_id: u16,
    },
    Pubrec {
        msg_id: u16,
    },
    Pubrel {
        msg_id: u16,
    },
    Subscribe {
        dup: bool,
        qos: QoS,
        msg_id: u16,
        topic: TopicRef,
    },
    Suback {
        qos: QoS,
        topic_id: u16,
        msg_id: u16,
        return_code: ReturnCode,
    },
    Unsubscribe {
        msg_id: u16,
        topic: TopicRef,
    },
    Unsuback {
        msg_id: u16,
    },
    Pingreq {
        /// Present when a sleeping client checks for buffered messages.
        /// An empty id has no encoding and is rejected.
        client_id: Option<String>,
    },
    Pingresp,
    Disconnect {
        /// Sleep duration in seconds.
        duration: Option<u16>,
    },
    WillTopicUpd {
        /// `None` deletes the will.
        will: Option<WillTopicFields>,
    },
    WillTopicResp {
        return_code: ReturnCode,
    },
    WillMsgUpd {
        msg: Bytes,
    },
    WillMsgResp {
        return_code: ReturnCode,
    },
}

impl Message {
    /// Message type identifier.
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::Advertise { .. } => msg_type::ADVERTISE,
            Message::SearchGw { .. } => msg_type::SEARCHGW,
            Message::GwInfo { .. } => msg_type::GWINFO,
            Message::Connect { .. } => msg_type::CONNECT,
            Message::Connack { .. } => msg_type::CONNACK,
            Message::WillTopicReq => msg_type::WILLTOPICREQ,
            Message::WillTopic { .. } => msg_type::WILLTOPIC,
            Message::WillMsgReq => msg_type::WILLMSGREQ,
            Message::WillMsg { .. } => msg_type::WILLMSG,
            Message::Register { .. } => msg_type::REGISTER,
            Message::Regack { .. } => msg_type::REGACK,
            Message::Publish { .. } => msg_type::PUBLISH,
            Message::Puback { .. } => msg_type::PUBACK,
            Message::Pubcomp { .. } => msg_type::PUBCOMP,
            Message::Pubrec { .. } => msg_type::PUBREC,
            Message::Pubrel { .. } => msg_type::PUBREL,
            Message::Subscribe { .. } => msg_type::SUBSCRIBE,
            Message::Suback { .. } => msg_type::SUBACK,
            Message::Unsubscribe { .. } => msg_type::UNSUBSCRIBE,
            Message::Unsuback { .. } => msg_type::UNSUBACK,
            Message::Pingreq { .. } => msg_type::PINGREQ,
            Message::Pingresp => msg_type::PINGRESP,
            Message::Disconnect { .. } => msg_type::DISCONNECT,
            Message::WillTopicUpd { .. } => msg_type::WILLTOPICUPD,
            Message::WillTopicResp { .. } => msg_type::WILLTOPICRESP,
            Message::WillMsgUpd { .. } => msg_type::WILLMSGUPD,
            Message::WillMsgResp { .. } => msg_type::WILLMSGRESP,
        }
    }

    /// Upper-case protocol name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Advertise { .. } => "ADVERTISE",
            Message::SearchGw { .. } => "SEARCHGW",
            Message::GwInfo { .. } => "GWINFO",
            Message::Connect { .. } => "CONNECT",
            Message::Connack { .. } => "CONNACK",
            Message::WillTopicReq => "WILLTOPICREQ",
            Message::WillTopic { .. } => "WILLTOPIC",
            Message::WillMsgReq => "WILLMSGREQ",
            Message::WillMsg { .. } => "WILLMSG",
            Message::Register { .. } => "REGISTER",
            Message::Regack { .. } => "REGACK",
            Message::Publish { .. } => "PUBLISH",
            Message::Puback { .. } => "PUBACK",
            Message::Pubcomp { .. } => "PUBCOMP",
            Message::Pubrec { .. } => "PUBREC",
            Message::Pubrel { .. } => "PUBREL",
            Message::Subscribe { .. } => "SUBSCRIBE",
            Message::Suback { .. } => "SUBACK",
            Message::Unsubscribe { .. } => "UNSUBSCRIBE",
            Message::Unsuback { .. } => "UNSUBACK",
            Message::Pingreq { .. } => "PINGREQ",
            Message::Pingresp => "PINGRESP",
            Message::Disconnect { .. } => "DISCONNECT",
            Message::WillTopicUpd { .. } => "WILLTOPICUPD",
            Message::WillTopicResp { .. } => "WILLTOPICRESP",
            Message::WillMsgUpd { .. } => "WILLMSGUPD",
            Message::WillMsgResp { .. } => "WILLMSGRESP",
        }
    }

    /// Message id, for the types that carry one.
    pub fn msg_id(&self) -> Option<u16> {
        match self {
            Message::Register { msg_id, .. }
            | Message::Regack { msg_id, .. }
            | Message::Publish { msg_id, .. }
            | Message::Puback { msg_id, .. }
            | Message::Pubcomp { msg_id }
            | Message::Pubrec { msg_id }
            | Message::Pubrel { msg_id }
            | Message::Subscribe { msg_id, .. }
            | Message::Suback { msg_id, .. }
            | Message::Unsubscribe { msg_id, .. }
            | Message::Unsuback { msg_id } => Some(*msg_id),
            _ => None,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Message::Advertise { .. } => 3,
            Message::SearchGw { .. } => 1,
            Message::GwInfo { gw_add, .. } => 1 + gw_add.len(),
            Message::Connect { client_id, .. } => 4 + client_id.len(),
            Message::Connack { .. }
            | Message::WillTopicResp { .. }
            | Message::WillMsgResp { .. } => 1,
            Message::WillTopicReq | Message::WillMsgReq | Message::Pingresp => 0,
            Message::WillTopic { will } | Message::WillTopicUpd { will } => {
                will.as_ref().map_or(0, |w| 1 + w.topic.len())
            }
            Message::WillMsg { msg } | Message::WillMsgUpd { msg } => msg.len(),
            Message::Register { topic_name, .. } => 4 + topic_name.len(),
            Message::Regack { .. } | Message::Puback { .. } => 5,
            Message::Publish { data, .. } => 5 + data.len(),
            Message::Pubcomp { .. }
            | Message::Pubrec { .. }
            | Message::Pubrel { .. }
            | Message::Unsuback { .. } => 2,
            Message::Subscribe { topic, .. } | Message::Unsubscribe { topic, .. } => {
                3 + topic.encoded_len()
            }
            Message::Suback { .. } => 6,
            Message::Pingreq { client_id } => client_id.as_ref().map_or(0, String::len),
            Message::Disconnect { duration } => duration.map_or(0, |_| 2),
        }
    }

    fn write_body<B: BufMut>(&self, buf: &mut B) {
        match self {
            Message::Advertise { gw_id, duration } => {
                buf.put_u8(*gw_id);
                buf.put_u16(*duration);
            }
            Message::SearchGw { radius } => buf.put_u8(*radius),
            Message::GwInfo { gw_id, gw_add } => {
                buf.put_u8(*gw_id);
                buf.put_slice(gw_add);
            }
            Message::Connect {
                will,
                clean_session,
                duration,
                client_id,
            } => {
                let flags = Flags::new()
                    .with_will(*will)
                    .with_clean_session(*clean_session);
                buf.put_u8(flags.0);
                buf.put_u8(PROTOCOL_ID);
                buf.put_u16(*duration);
                buf.put_slice(client_id.as_bytes());
            }
            Message::Connack { return_code }
            | Message::WillTopicResp { return_code }
            | Message::WillMsgResp { return_code } => buf.put_u8(return_code.to_byte()),
            Message::WillTopicReq | Message::WillMsgReq | Message::Pingresp => {}
            Message::WillTopic { will } | Message::WillTopicUpd { will } => {
                if let Some(w) = will {
                    buf.put_u8(w.flags().0);
                    buf.put_slice(w.topic.as_bytes());
                }
            }
            Message::WillMsg { msg } | Message::WillMsgUpd { msg } => buf.put_slice(msg),
            Message::Register {
                topic_id,
                msg_id,
                topic_name,
            } => {
                buf.put_u16(*topic_id);
                buf.put_u16(*msg_id);
                buf.put_slice(topic_name.as_bytes());
            }
            Message::Regack {
                topic_id,
                msg_id,
                return_code,
            }
            | Message::Puback {
                topic_id,
                msg_id,
                return_code,
            } => {
                buf.put_u16(*topic_id);
                buf.put_u16(*msg_id);
                buf.put_u8(return_code.to_byte());
            }
            Message::Publish {
                dup,
                qos,
                retain,
                topic_id_type,
                topic_id,
                msg_id,
                data,
            } => {
                let flags = Flags::new()
                    .with_dup(*dup)
                    .with_qos(*qos)
                    .with_retain(*retain)
                    .with_topic_id_type(*topic_id_type);
                buf.put_u8(flags.0);
                buf.put_u16(*topic_id);
                buf.put_u16(*msg_id);
                buf.put_slice(data);
            }
            Message::Pubcomp { msg_id }
            | Message::Pubrec { msg_id }
            | Message::Pubrel { msg_id }
            | Message::Unsuback { msg_id } => buf.put_u16(*msg_id),
            Message::Subscribe {
                dup,
                qos,
                msg_id,
                topic,
            } => {
                let flags = Flags::new()
                    .with_dup(*dup)
                    .with_qos(*qos)
                    .with_topic_id_type(topic.id_type());
                buf.put_u8(flags.0);
                buf.put_u16(*msg_id);
                topic.write(buf);
            }
            Message::Suback {
                qos,
                topic_id,
                msg_id,
                return_code,
            } => {
                buf.put_u8(Flags::new().with_qos(*qos).0);
                buf.put_u16(*topic_id);
                buf.put_u16(*msg_id);
                buf.put_u8(return_code.to_byte());
            }
            Message::Unsubscribe { msg_id, topic } => {
                buf.put_u8(Flags::new().with_topic_id_type(topic.id_type()).0);
                buf.put_u16(*msg_id);
                topic.write(buf);
            }
            Message::Pingreq { client_id } => {
                if let Some(id) = client_id {
                    buf.put_slice(id.as_bytes());
                }
            }
            Message::Disconnect { duration } => {
                if let Some(d) = duration {
                    buf.put_u16(*d);
                }
            }
        }
    }

    /// Encoded length in bytes, length prefix included.
    ///
    /// Always equal to `self.encode()?.len()` for encodable messages.
    pub fn length(&self) -> usize {
        let body_len = self.body_len();
        Header::for_body(self.msg_type(), body_len)
            .map(|h| h.length)
            .unwrap_or(body_len + 4)
    }

    /// Encode into a fresh byte vector.
    ///
    /// # Errors
    ///
    /// Returns `EncodingTooLarge` if the frame would exceed 65535 bytes, and
    /// `Invalid` for a PINGREQ carrying an empty client id.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if matches!(self, Message::Pingreq { client_id: Some(id) } if id.is_empty()) {
            return Err(MqttsnError::Invalid("PINGREQ client id is empty".into()));
        }
        let header = Header::for_body(self.msg_type(), self.body_len())?;
        let mut buf = Vec::with_capacity(header.length);
        header.encode_into(&mut buf);
        self.write_body(&mut buf);
        Ok(buf)
    }

    /// Encode into `Bytes`, for buffering as a pending frame.
    pub fn encode_bytes(&self) -> Result<Bytes> {
        self.encode().map(Bytes::from)
    }

    /// Decode the first message in `buf` using the default factory.
    ///
    /// Returns the message and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Message, usize)> {
        MessageFactory::global().decode(buf)
    }
}

/// Decoder for the body of one message type.
pub type BodyDecoder = fn(&Bytes) -> Result<Message>;

/// Type-dispatched message decoding.
///
/// Wraps a [`Dispatcher`] of per-type body decoders. Unknown type ids
/// surface as `UnsupportedMessage`.
#[derive(Debug)]
pub struct MessageFactory {
    decoders: Dispatcher<BodyDecoder>,
}

impl MessageFactory {
    /// Create a factory with every supported message type registered.
    pub fn new(strategy: DispatchStrategy) -> Self {
        let mut decoders: Dispatcher<BodyDecoder> = Dispatcher::new(strategy);
        decoders.register(msg_type::ADVERTISE, decode_advertise);
        decoders.register(msg_type::SEARCHGW, decode_searchgw);
        decoders.register(msg_type::GWINFO, decode_gwinfo);
        decoders.register(msg_type::CONNECT, decode_connect);
        decoders.register(msg_type::CONNACK, decode_connack);
        decoders.register(msg_type::WILLTOPICREQ, decode_willtopicreq);
        decoders.register(msg_type::WILLTOPIC, decode_willtopic);
        decoders.register(msg_type::WILLMSGREQ, decode_willmsgreq);
        decoders.register(msg_type::WILLMSG, decode_willmsg);
        decoders.register(msg_type::REGISTER, decode_register);
        decoders.register(msg_type::REGACK, decode_regack);
        decoders.register(msg_type::PUBLISH, decode_publish);
        decoders.register(msg_type::PUBACK, decode_puback);
        decoders.register(msg_type::PUBCOMP, decode_pubcomp);
        decoders.register(msg_type::PUBREC, decode_pubrec);
        decoders.register(msg_type::PUBREL, decode_pubrel);
        decoders.register(msg_type::SUBSCRIBE, decode_subscribe);
        decoders.register(msg_type::SUBACK, decode_suback);
        decoders.register(msg_type::UNSUBSCRIBE, decode_unsubscribe);
        decoders.register(msg_type::UNSUBACK, decode_unsuback);
        decoders.register(msg_type::PINGREQ, decode_pingreq);
        decoders.register(msg_type::PINGRESP, decode_pingresp);
        decoders.register(msg_type::DISCONNECT, decode_disconnect);
        decoders.register(msg_type::WILLTOPICUPD, decode_willtopicupd);
        decoders.register(msg_type::WILLTOPICRESP, decode_willtopicresp);
        decoders.register(msg_type::WILLMSGUPD, decode_willmsgupd);
        decoders.register(msg_type::WILLMSGRESP, decode_willmsgresp);
        Self { decoders }
    }

    /// Shared factory using the default strategy.
    pub fn global() -> &'static MessageFactory {
        static FACTORY: OnceLock<MessageFactory> = OnceLock::new();
        FACTORY.get_or_init(|| MessageFactory::new(DispatchStrategy::default()))
    }

    pub fn strategy(&self) -> DispatchStrategy {
        self.decoders.strategy()
    }

    /// Check if `id` has a registered decoder.
    pub fn supports(&self, id: u8) -> bool {
        self.decoders.contains(id)
    }

    /// Decode the body of an already split frame.
    pub fn decode_frame(&self, frame: &Frame) -> Result<Message> {
        let decoder = self.decoders.lookup(frame.msg_type)?;
        decoder(&frame.body)
    }

    /// Split and decode the first frame in `buf`.
    pub fn decode(&self, buf: &[u8]) -> Result<(Message, usize)> {
        let (frame, consumed) = split_frame(buf)?;
        Ok((self.decode_frame(&frame)?, consumed))
    }
}

impl Default for MessageFactory {
    fn default() -> Self {
        Self::new(DispatchStrategy::default())
    }
}

// Field helpers

fn exact_len(body: &Bytes, len: usize, name: &str) -> Result<()> {
    if body.len() != len {
        return Err(MqttsnError::Invalid(format!(
            "{} body must be {} bytes, got {}",
            name,
            len,
            body.len()
        )));
    }
    Ok(())
}

fn min_len(body: &Bytes, len: usize, name: &str) -> Result<()> {
    if body.len() < len {
        return Err(MqttsnError::Invalid(format!(
            "{} body must be at least {} bytes, got {}",
            name,
            len,
            body.len()
        )));
    }
    Ok(())
}

#[inline]
fn read_u16(body: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([body[at], body[at + 1]])
}

fn read_topic_id(body: &[u8], at: usize) -> Result<u16> {
    let id = read_u16(body, at);
    if id > MAX_TOPIC_ID {
        return Err(MqttsnError::Invalid(format!("Topic id {:#06x} reserved", id)));
    }
    Ok(id)
}

fn read_string(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| MqttsnError::Invalid(format!("Invalid UTF-8: {}", e)))
}

fn read_topic_id_type(flags: Flags) -> Result<TopicIdType> {
    flags
        .topic_id_type()
        .ok_or_else(|| MqttsnError::Invalid("Reserved topic id type".into()))
}

fn read_will_fields(body: &Bytes) -> Result<Option<WillTopicFields>> {
    if body.is_empty() {
        return Ok(None);
    }
    let flags = Flags(body[0]);
    Ok(Some(WillTopicFields {
        qos: flags.qos(),
        retain: flags.retain(),
        topic: read_string(&body[1..])?,
    }))
}

fn read_topic_ref(kind: TopicIdType, bytes: &[u8]) -> Result<TopicRef> {
    match kind {
        TopicIdType::Normal => {
            if bytes.is_empty() {
                return Err(MqttsnError::Invalid("Empty topic name".into()));
            }
            Ok(TopicRef::Name(read_string(bytes)?))
        }
        TopicIdType::Predefined | TopicIdType::ShortName if bytes.len() != 2 => Err(
            MqttsnError::Invalid(format!("Topic id field must be 2 bytes, got {}", bytes.len())),
        ),
        TopicIdType::Predefined => Ok(TopicRef::Predefined(read_topic_id(bytes, 0)?)),
        TopicIdType::ShortName => Ok(TopicRef::Short([bytes[0], bytes[1]])),
    }
}

// Per-type decoders

fn decode_advertise(body: &Bytes) -> Result<Message> {
    exact_len(body, 3, "ADVERTISE")?;
    Ok(Message::Advertise {
        gw_id: body[0],
        duration: read_u16(body, 1),
    })
}

fn decode_searchgw(body: &Bytes) -> Result<Message> {
    exact_len(body, 1, "SEARCHGW")?;
    Ok(Message::SearchGw { radius: body[0] })
}

fn decode_gwinfo(body: &Bytes) -> Result<Message> {
    min_len(body, 1, "GWINFO")?;
    Ok(Message::GwInfo {
        gw_id: body[0],
        gw_add: body.slice(1..),
    })
}

fn decode_connect(body: &Bytes) -> Result<Message> {
    min_len(body, 4, "CONNECT")?;
    if body[1] != PROTOCOL_ID {
        return Err(MqttsnError::Invalid(format!(
            "Unknown protocol id {:#04x}",
            body[1]
        )));
    }
    let flags = Flags(body[0]);
    Ok(Message::Connect {
        will: flags.will(),
        clean_session: flags.clean_session(),
        duration: read_u16(body, 2),
        client_id: read_string(&body[4..])?,
    })
}

fn decode_return_code_only(body: &Bytes, name: &str) -> Result<ReturnCode> {
    exact_len(body, 1, name)?;
    ReturnCode::from_byte(body[0])
}

fn decode_connack(body: &Bytes) -> Result<Message> {
    Ok(Message::Connack {
        return_code: decode_return_code_only(body, "CONNACK")?,
    })
}

fn decode_willtopicreq(body: &Bytes) -> Result<Message> {
    exact_len(body, 0, "WILLTOPICREQ")?;
    Ok(Message::WillTopicReq)
}

fn decode_willtopic(body: &Bytes) -> Result<Message> {
    Ok(Message::WillTopic {
        will: read_will_fields(body)?,
    })
}

fn decode_willmsgreq(body: &Bytes) -> Result<Message> {
    exact_len(body, 0, "WILLMSGREQ")?;
    Ok(Message::WillMsgReq)
}

fn decode_willmsg(body: &Bytes) -> Result<Message> {
    Ok(Message::WillMsg { msg: body.clone() })
}

fn decode_register(body: &Bytes) -> Result<Message> {
    min_len(body, 4, "REGISTER")?;
    Ok(Message::Register {
        topic_id: read_topic_id(body, 0)?,
        msg_id: read_u16(body, 2),
        topic_name: read_string(&body[4..])?,
    })
}

fn decode_regack(body: &Bytes) -> Result<Message> {
    exact_len(body, 5, "REGACK")?;
    Ok(Message::Regack {
        topic_id: read_topic_id(body, 0)?,
        msg_id: read_u16(body, 2),
        return_code: ReturnCode::from_byte(body[4])?,
    })
}

fn decode_publish(body: &Bytes) -> Result<Message> {
    min_len(body, 5, "PUBLISH")?;
    let flags = Flags(body[0]);
    Ok(Message::Publish {
        dup: flags.dup(),
        qos: flags.qos(),
        retain: flags.retain(),
        topic_id_type: read_topic_id_type(flags)?,
        topic_id: read_topic_id(body, 1)?,
        msg_id: read_u16(body, 3),
        data: body.slice(5..),
    })
}

fn decode_puback(body: &Bytes) -> Result<Message> {
    exact_len(body, 5, "PUBACK")?;
    Ok(Message::Puback {
        topic_id: read_topic_id(body, 0)?,
        msg_id: read_u16(body, 2),
        return_code: ReturnCode::from_byte(body[4])?,
    })
}

fn decode_msg_id_only(body: &Bytes, name: &str) -> Result<u16> {
    exact_len(body, 2, name)?;
    Ok(read_u16(body, 0))
}

fn decode_pubcomp(body: &Bytes) -> Result<Message> {
    Ok(Message::Pubcomp {
        msg_id: decode_msg_id_only(body, "PUBCOMP")?,
    })
}

fn decode_pubrec(body: &Bytes) -> Result<Message> {
    Ok(Message::Pubrec {
        msg_id: decode_msg_id_only(body, "PUBREC")?,
    })
}

fn decode_pubrel(body: &Bytes) -> Result<Message> {
    Ok(Message::Pubrel {
        msg_id: decode_msg_id_only(body, "PUBREL")?,
    })
}

fn decode_subscribe(body: &Bytes) -> Result<Message> {
    min_len(body, 4, "SUBSCRIBE")?;
    let flags = Flags(body[0]);
    Ok(Message::Subscribe {
        dup: flags.dup(),
        qos: flags.qos(),
        msg_id: read_u16(body, 1),
        topic: read_topic_ref(read_topic_id_type(flags)?, &body[3..])?,
    })
}

fn decode_suback(body: &Bytes) -> Result<Message> {
    exact_len(body, 6, "SUBACK")?;
    Ok(Message::Suback {
        qos: Flags(body[0]).qos(),
        topic_id: read_topic_id(body, 1)?,
        msg_id: read_u16(body, 3),
        return_code: ReturnCode::from_byte(body[5])?,
    })
}

fn decode_unsubscribe(body: &Bytes) -> Result<Message> {
    min_len(body, 4, "UNSUBSCRIBE")?;
    let flags = Flags(body[0]);
    Ok(Message::Unsubscribe {
        msg_id: read_u16(body, 1),
        topic: read_topic_ref(read_topic_id_type(flags)?, &body[3..])?,
    })
}

fn decode_unsuback(body: &Bytes) -> Result<Message> {
    Ok(Message::Unsuback {
        msg_id: decode_msg_id_only(body, "UNSUBACK")?,
    })
}

fn decode_pingreq(body: &Bytes) -> Result<Message> {
    let client_id = if body.is_empty() {
        None
    } else {
        Some(read_string(body)?)
    };
    Ok(Message::Pingreq { client_id })
}

fn decode_pingresp(body: &Bytes) -> Result<Message> {
    exact_len(body, 0, "PINGRESP")?;
    Ok(Message::Pingresp)
}

fn decode_disconnect(body: &Bytes) -> Result<Message> {
    let duration = match body.len() {
        0 => None,
        2 => Some(read_u16(body, 0)),
        n => {
            return Err(MqttsnError::Invalid(format!(
                "DISCONNECT body must be 0 or 2 bytes, got {}",
                n
            )))
        }
    };
    Ok(Message::Disconnect { duration })
}

fn decode_willtopicupd(body: &Bytes) -> Result<Message> {
    Ok(Message::WillTopicUpd {
        will: read_will_fields(body)?,
    })
}

fn decode_willtopicresp(body: &Bytes) -> Result<Message> {
    Ok(Message::WillTopicResp {
        return_code: decode_return_code_only(body, "WILLTOPICRESP")?,
    })
}

fn decode_willmsgupd(body: &Bytes) -> Result<Message> {
    Ok(Message::WillMsgUpd { msg: body.clone() })
}

fn decode_willmsgresp(body: &Bytes) -> Result<Message> {
    Ok(Message::WillMsgResp {
        return_code: decode_return_code_only(body, "WILLMSGRESP")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    fn samples() -> Vec<Message> {
        vec![
            Message::Advertise { gw_id: 3, duration: 900 },
            Message::SearchGw { radius: 1 },
            Message::GwInfo { gw_id: 1, gw_add: Bytes::from_static(&[192, 168, 0, 1]) },
            Message::GwInfo { gw_id: 2, gw_add: Bytes::new() },
            Message::Connect {
                will: true,
                clean_session: true,
                duration: 60,
                client_id: "dev1".into(),
            },
            Message::Connack { return_code: ReturnCode::Congestion },
            Message::WillTopicReq,
            Message::WillTopic {
                will: Some(WillTopicFields {
                    qos: QoS::AtLeastOnce,
                    retain: true,
                    topic: "dev/lwt".into(),
                }),
            },
            Message::WillTopic { will: None },
            Message::WillMsgReq,
            Message::WillMsg { msg: Bytes::from_static(b"offline") },
            Message::Register { topic_id: 0, msg_id: 9, topic_name: "a/b".into() },
            Message::Regack { topic_id: 12, msg_id: 9, return_code: ReturnCode::Accepted },
            Message::Publish {
                dup: false,
                qos: QoS::ExactlyOnce,
                retain: true,
                topic_id_type: TopicIdType::Normal,
                topic_id: 12,
                msg_id: 77,
                data: Bytes::from_static(b"21.5"),
            },
            Message::Puback { topic_id: 12, msg_id: 77, return_code: ReturnCode::InvalidTopicId },
            Message::Pubcomp { msg_id: 1 },
            Message::Pubrec { msg_id: 2 },
            Message::Pubrel { msg_id: 3 },
            Message::Subscribe {
                dup: false,
                qos: QoS::AtLeastOnce,
                msg_id: 4,
                topic: TopicRef::Name("x/+".into()),
            },
            Message::Subscribe {
                dup: true,
                qos: QoS::AtMostOnce,
                msg_id: 5,
                topic: TopicRef::Predefined(33),
            },
            Message::Suback {
                qos: QoS::AtLeastOnce,
                topic_id: 0,
                msg_id: 4,
                return_code: ReturnCode::Accepted,
            },
            Message::Unsubscribe { msg_id: 6, topic: TopicRef::Short(*b"ab") },
            Message::Unsuback { msg_id: 6 },
            Message::Pingreq { client_id: None },
            Message::Pingreq { client_id: Some("dev1".into()) },
            Message::Pingresp,
            Message::Disconnect { duration: None },
            Message::Disconnect { duration: Some(300) },
            Message::WillTopicUpd { will: None },
            Message::WillTopicResp { return_code: ReturnCode::NotSupported },
            Message::WillMsgUpd { msg: Bytes::from_static(b"gone") },
            Message::WillMsgResp { return_code: ReturnCode::Accepted },
        ]
    }

    #[test]
    fn test_roundtrip_all_message_types() {
        for msg in samples() {
            let bytes = msg.encode().unwrap();
            assert_eq!(bytes.len(), msg.length(), "{}", msg.name());

            let (decoded, consumed) = Message::decode(&bytes).unwrap();
            assert_eq!(decoded, msg);
            assert_eq!(consumed, bytes.len());
        }
    }

    #[test]
    fn test_connect_wire_layout() {
        let msg = Message::Connect {
            will: false,
            clean_session: true,
            duration: 60,
            client_id: "dev1".into(),
        };
        assert_eq!(
            msg.encode().unwrap(),
            vec![0x0A, 0x04, 0x04, 0x01, 0x00, 0x3C, b'd', b'e', b'v', b'1']
        );
    }

    #[test]
    fn test_publish_wire_layout() {
        let msg = Message::Publish {
            dup: false,
            qos: QoS::NoGwPublish,
            retain: false,
            topic_id_type: TopicIdType::Predefined,
            topic_id: 0x0102,
            msg_id: 0,
            data: Bytes::from_static(b"x"),
        };
        assert_eq!(
            msg.encode().unwrap(),
            vec![0x08, 0x0C, 0x61, 0x01, 0x02, 0x00, 0x00, b'x']
        );
    }

    #[test]
    fn test_long_publish_uses_three_byte_prefix() {
        let msg = Message::Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic_id_type: TopicIdType::Normal,
            topic_id: 1,
            msg_id: 0,
            data: Bytes::from(vec![7u8; 400]),
        };
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes.len(), msg.length());
        assert_eq!(Message::decode(&bytes).unwrap().0, msg);
    }

    #[test]
    fn test_encoding_too_large() {
        let msg = Message::WillMsg { msg: Bytes::from(vec![0u8; 70_000]) };
        assert!(matches!(
            msg.encode(),
            Err(MqttsnError::EncodingTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_pingreq_client_id_is_rejected() {
        let msg = Message::Pingreq { client_id: Some(String::new()) };
        assert!(matches!(msg.encode(), Err(MqttsnError::Invalid(_))));

        let bytes = Message::Pingreq { client_id: None }.encode().unwrap();
        assert_eq!(bytes, vec![2, msg_type::PINGREQ]);
    }

    #[test]
    fn test_truncated_input_is_incomplete() {
        let bytes = Message::Register { topic_id: 0, msg_id: 1, topic_name: "t".into() }
            .encode()
            .unwrap();
        assert!(matches!(
            Message::decode(&bytes[..bytes.len() - 1]),
            Err(MqttsnError::Incomplete)
        ));
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let bytes = build_frame(0x03, &[]).unwrap();
        assert!(matches!(
            Message::decode(&bytes),
            Err(MqttsnError::UnsupportedMessage(0x03))
        ));
        let bytes = build_frame(0xFE, &[0x01]).unwrap();
        assert!(matches!(
            Message::decode(&bytes),
            Err(MqttsnError::UnsupportedMessage(0xFE))
        ));
    }

    #[test]
    fn test_out_of_range_fields_are_invalid() {
        let cases: Vec<Vec<u8>> = vec![
            // return code 4
            build_frame(msg_type::CONNACK, &[0x04]).unwrap(),
            // topic id 0xFFFF
            build_frame(msg_type::REGACK, &[0xFF, 0xFF, 0x00, 0x01, 0x00]).unwrap(),
            // reserved topic id type
            build_frame(msg_type::PUBLISH, &[0x03, 0x00, 0x01, 0x00, 0x00]).unwrap(),
            // protocol id 2
            build_frame(msg_type::CONNECT, &[0x04, 0x02, 0x00, 0x3C, b'x']).unwrap(),
            // wrong fixed size
            build_frame(msg_type::PUBACK, &[0x00, 0x01, 0x00, 0x01]).unwrap(),
            build_frame(msg_type::DISCONNECT, &[0x00]).unwrap(),
            // invalid UTF-8
            build_frame(msg_type::REGISTER, &[0x00, 0x01, 0x00, 0x01, 0xFF, 0xFE]).unwrap(),
            // predefined topic field of 3 bytes
            build_frame(msg_type::SUBSCRIBE, &[0x21, 0x00, 0x01, 0x00, 0x01, 0x02]).unwrap(),
        ];

        for bytes in cases {
            assert!(
                matches!(Message::decode(&bytes), Err(MqttsnError::Invalid(_))),
                "{:02x?}",
                bytes
            );
        }
    }

    #[test]
    fn test_strategies_decode_identically() {
        let linear = MessageFactory::new(DispatchStrategy::Linear);
        let binary = MessageFactory::new(DispatchStrategy::BinarySearch);

        for msg in samples() {
            let bytes = msg.encode().unwrap();
            assert_eq!(linear.decode(&bytes).unwrap(), binary.decode(&bytes).unwrap());
        }
        for id in 0..=u8::MAX {
            assert_eq!(linear.supports(id), binary.supports(id));
        }
        assert!(!linear.supports(0x03));
        assert!(!binary.supports(0xFE));
    }

    #[test]
    fn test_msg_id_accessor() {
        assert_eq!(Message::Pubrel { msg_id: 5 }.msg_id(), Some(5));
        assert_eq!(Message::Pingresp.msg_id(), None);
        assert_eq!(Message::Connack { return_code: ReturnCode::Accepted }.msg_id(), None);
    }
}
