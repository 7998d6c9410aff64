//! Frame struct and frame splitting.
//!
//! A [`Frame`] is one length-delimited MQTT-SN frame with its prefix
//! stripped: the message type id and the raw type-specific fields.
//! The body is copied out of the caller's buffer, so frames outlive the
//! `process_data` call that produced them.
//!
//! # Example
//!
//! ```
//! use mqttsn_client::protocol::{build_frame, split_frame, msg_type};
//!
//! let bytes = build_frame(msg_type::CONNACK, &[0x00]).unwrap();
//! assert_eq!(bytes, vec![0x03, 0x05, 0x00]);
//!
//! let (frame, consumed) = split_frame(&bytes).unwrap();
//! assert_eq!(consumed, 3);
//! assert_eq!(frame.msg_type(), msg_type::CONNACK);
//! assert_eq!(frame.body(), &[0x00]);
//! ```

use bytes::{BufMut, Bytes};

use super::wire_format::Header;
use crate::error::{MqttsnError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type identifier.
    pub msg_type: u8,
    /// Type-specific fields.
    pub body: Bytes,
}

impl Frame {
    pub fn new(msg_type: u8, body: Bytes) -> Self {
        Self { msg_type, body }
    }

    /// Create a frame from a raw slice (copies data).
    pub fn from_parts(msg_type: u8, body: &[u8]) -> Self {
        Self {
            msg_type,
            body: Bytes::copy_from_slice(body),
        }
    }

    #[inline]
    pub fn msg_type(&self) -> u8 {
        self.msg_type
    }

    #[inline]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[inline]
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Encoded size of this frame, length prefix included.
    pub fn encoded_len(&self) -> Result<usize> {
        Ok(Header::for_body(self.msg_type, self.body.len())?.length)
    }

    /// Re-encode the frame with a freshly computed length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        build_frame(self.msg_type, &self.body)
    }
}

/// Build a complete frame as a single byte vector.
///
/// The length prefix is computed from the body size; bodies that would
/// push the frame past 65535 bytes fail with `EncodingTooLarge`.
pub fn build_frame(msg_type: u8, body: &[u8]) -> Result<Vec<u8>> {
    let header = Header::for_body(msg_type, body.len())?;
    let mut buf = Vec::with_capacity(header.length);
    header.encode_into(&mut buf);
    buf.put_slice(body);
    Ok(buf)
}

/// Split the first frame off the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied. Nothing is
/// consumed on error; on `Incomplete` the caller should wait for more data.
pub fn split_frame(buf: &[u8]) -> Result<(Frame, usize)> {
    if buf.first() == Some(&0) {
        return Err(MqttsnError::Invalid("Zero length prefix".into()));
    }

    let header = Header::decode(buf).ok_or(MqttsnError::Incomplete)?;
    header.validate()?;

    if header.length > buf.len() {
        return Err(MqttsnError::Incomplete);
    }

    let frame = Frame::from_parts(header.msg_type, &buf[header.header_len()..header.length]);
    Ok((frame, header.length))
}
