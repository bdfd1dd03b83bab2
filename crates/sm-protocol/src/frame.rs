//! Frame header encoding/decoding
//!
//! Every record on the wire starts with a 4-byte header:
//! - message_type: 1 byte (u8)
//! - body_length: 3 bytes (u24, big-endian, max 16MB)
//!
//! The body that follows is the bincode encoding of the connection id and
//! the message.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum body size (16MB - 1, limited by 24-bit length field)
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing type and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Type of message in the body
    pub message_type: MessageType,
    /// Length of the body in bytes
    pub body_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(message_type: MessageType, body_length: u32) -> Self {
        Self {
            message_type,
            body_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.message_type.as_u8());
        // body_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.body_length >> 16) as u8);
        dst.put_u16(self.body_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown message type).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming anything
        let type_byte = src[0];
        let message_type = MessageType::from_u8(type_byte)
            .ok_or(ProtocolError::UnknownMessageType(type_byte))?;

        src.advance(1);
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;

        Ok(Some(Self {
            message_type,
            body_length: (len_high << 16) | len_low,
        }))
    }
}
