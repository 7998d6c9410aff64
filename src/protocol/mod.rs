//! Protocol module - wire format, framing, and the MQTT-SN message set.
//!
//! - Length prefix and type id encoding/decoding
//! - Frame splitting for datagram links, frame buffer for stream links
//! - Typed messages with type-dispatched decoding

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{build_frame, split_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use message::{BodyDecoder, Message, MessageFactory, TopicRef, WillTopicFields};
pub use wire_format::{
    flags, msg_type, Flags, Header, QoS, ReturnCode, TopicIdType, LONG_LENGTH_MARKER,
    MAX_CLIENT_ID_LEN, MAX_FRAME_LENGTH, MAX_TOPIC_ID, PROTOCOL_ID, SHORT_LENGTH_MAX,
};
