//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations.
///
/// Every variant is fatal to the transport: there is no resynchronisation
/// after a malformed record.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown message type
    #[error("Unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Body exceeds maximum size
    #[error("Frame body too large: {size} bytes exceeds maximum of {max} bytes")]
    BodyTooLarge { size: usize, max: usize },

    /// Header announced one message type, body decoded to another
    #[error("Frame type mismatch: header says {header:?}, body is {body:?}")]
    TypeMismatch {
        header: crate::MessageType,
        body: crate::MessageType,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
