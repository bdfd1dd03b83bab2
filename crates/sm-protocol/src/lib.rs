//! sm-protocol: Wire protocol for sshmux connection multiplexing
//!
//! This crate defines the frame format used to interleave many logical
//! TCP connections over a single duplex byte stream (an SSH session's
//! stdio, or a local subprocess pipe).

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Frame, FrameCodec};
pub use connection::ConnectionId;
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_BODY_SIZE};
pub use message::{Message, MessageType};
