//! Message types for the sshmux protocol
//!
//! A message is exactly one of: a chunk of connection data, or one of the
//! three control signals. Representing them as an enum rather than as
//! independent flags means a frame can never carry two control signals.
//!
//! # Close handshake
//!
//! 1. The side whose local socket hits EOF sends `CloseRequest`
//! 2. The peer closes its socket and answers with `CloseAck`
//! 3. On `CloseAck` the originator releases the connection; any later frame
//!    for that id is dropped as unknown
//!
//! `KeepAlive` frames keep idle transports from timing out and are discarded
//! before dispatch.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message type identifier, carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Connection payload
    Data = 0x01,
    /// Local socket reached its end
    CloseRequest = 0x02,
    /// Close completed, release the connection
    CloseAck = 0x03,
    /// Liveness ping
    KeepAlive = 0x04,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Data),
            0x02 => Some(Self::CloseRequest),
            0x03 => Some(Self::CloseAck),
            0x04 => Some(Self::KeepAlive),
            _ => None,
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Bytes read from a logical connection's socket (may be empty)
    Data(Bytes),

    /// The sender's socket for this connection is done
    CloseRequest,

    /// The sender finished closing its side
    CloseAck,

    /// Liveness ping, no connection semantics
    KeepAlive,
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Data(_) => MessageType::Data,
            Message::CloseRequest => MessageType::CloseRequest,
            Message::CloseAck => MessageType::CloseAck,
            Message::KeepAlive => MessageType::KeepAlive,
        }
    }

    /// Whether this message is a control signal rather than data
    pub fn is_control(&self) -> bool {
        !matches!(self, Message::Data(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_roundtrip() {
        for msg_type in [
            MessageType::Data,
            MessageType::CloseRequest,
            MessageType::CloseAck,
            MessageType::KeepAlive,
        ] {
            let recovered = MessageType::from_u8(msg_type.as_u8()).unwrap();
            assert_eq!(recovered, msg_type);
        }
        assert!(MessageType::from_u8(0x00).is_none());
    }

    #[test]
    fn test_control_messages() {
        assert!(!Message::Data(Bytes::new()).is_control());
        assert!(Message::CloseRequest.is_control());
        assert!(Message::CloseAck.is_control());
        assert!(Message::KeepAlive.is_control());
    }
}
