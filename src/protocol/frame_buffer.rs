//! Frame buffer for stream-oriented links.
//!
//! Datagram transports hand one frame per `process_data` call, but a
//! serial line delivers arbitrary chunks. `FrameBuffer` accumulates those
//! chunks in a `bytes::BytesMut` and yields complete frames:
//! - `WaitingForHeader`: need the length prefix and the type id
//! - `WaitingForBody`: header parsed, need N more body bytes
//!
//! # Example
//!
//! ```
//! use mqttsn_client::protocol::{FrameBuffer, msg_type};
//!
//! let mut buffer = FrameBuffer::new();
//! assert!(buffer.push(&[0x03, msg_type::CONNACK]).unwrap().is_empty());
//!
//! let frames = buffer.push(&[0x00]).unwrap();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].msg_type(), msg_type::CONNACK);
//! ```

use bytes::BytesMut;

use super::wire_format::{Header, MAX_FRAME_LENGTH};
use super::Frame;
use crate::error::{MqttsnError, Result};

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    WaitingForHeader,
    WaitingForBody { header: Header },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    /// Largest accepted total frame length.
    max_frame_len: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting frames up to 65535 bytes.
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LENGTH)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(512),
            state: State::WaitingForHeader,
            max_frame_len,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` on a zero or undersized length prefix, or a frame
    /// above the size limit. The buffer is cleared, since a stream cannot
    /// resynchronise after a corrupt prefix.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            match self.try_extract_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    self.clear();
                    return Err(e);
                }
            }
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match &self.state {
            State::WaitingForHeader => {
                if self.buffer.first() == Some(&0) {
                    return Err(MqttsnError::Invalid("Zero length prefix".into()));
                }

                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };
                header.validate()?;

                if header.length > self.max_frame_len {
                    return Err(MqttsnError::Invalid(format!(
                        "Frame length {} exceeds maximum {}",
                        header.length, self.max_frame_len
                    )));
                }

                let _ = self.buffer.split_to(header.header_len());
                self.state = State::WaitingForBody { header };
                self.try_extract_one()
            }

            State::WaitingForBody { header } => {
                let remaining = header.body_len();
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                let msg_type = header.msg_type;
                self.state = State::WaitingForHeader;

                Ok(Some(Frame::new(msg_type, body)))
            }
        }
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForHeader;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, msg_type};

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(msg_type::WILLMSG, b"hello").unwrap();

        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type(), msg_type::WILLMSG);
        assert_eq!(frames[0].body(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(msg_type::PINGREQ, b"").unwrap();
        combined.extend(build_frame(msg_type::CONNACK, &[0]).unwrap());
        combined.extend(build_frame(msg_type::PUBREL, &[0, 9]).unwrap());

        let frames = buffer.push(&combined).unwrap();

        let types: Vec<u8> = frames.iter().map(Frame::msg_type).collect();
        assert_eq!(
            types,
            vec![msg_type::PINGREQ, msg_type::CONNACK, msg_type::PUBREL]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_long_prefix() {
        let mut buffer = FrameBuffer::new();
        let body = vec![0x55; 300];
        let bytes = build_frame(msg_type::WILLMSG, &body).unwrap();

        assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        assert!(buffer.push(&bytes[2..10]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");

        let frames = buffer.push(&bytes[10..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), &body[..]);
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(msg_type::REGACK, &[0, 1, 0, 2, 0]).unwrap();

        let mut frames = Vec::new();
        for byte in &bytes {
            frames.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].body(), &[0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_max_frame_len_validation() {
        let mut buffer = FrameBuffer::with_max_frame_len(64);
        let bytes = build_frame(msg_type::WILLMSG, &[0u8; 100]).unwrap();

        let result = buffer.push(&bytes);

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_prefix_clears_buffer() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push(&[0x00, 0x17]).is_err());
        assert!(buffer.is_empty());

        let frames = buffer.push(&[0x02, msg_type::PINGRESP]).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let first = build_frame(msg_type::PUBCOMP, &[0, 1]).unwrap();
        let second = build_frame(msg_type::PUBREC, &[0, 2]).unwrap();

        let mut data = first.clone();
        data.extend_from_slice(&second[..3]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert_eq!(buffer.len(), 1);

        let frames = buffer.push(&second[3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type(), msg_type::PUBREC);
    }
}
