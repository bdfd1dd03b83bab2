//! Error types for the multiplexing engine

use sm_protocol::ConnectionId;
use thiserror::Error;

/// Errors local to one logical connection.
///
/// These never propagate past the dispatcher; they only drive the
/// affected connection through termination.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Writing to the connection's socket failed
    #[error("Write to {id} failed: {source}")]
    Write {
        id: ConnectionId,
        #[source]
        source: std::io::Error,
    },

    /// The connection was closed or terminated
    #[error("Connection {0} is closed")]
    Closed(ConnectionId),

    /// The outbound queue is gone (forwarder torn down)
    #[error("Outbound queue closed")]
    QueueClosed,
}

/// Errors from registry insertion
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured connection ceiling was reached
    #[error("Connection limit of {0} reached")]
    Full(usize),

    /// A connection with this id is already registered
    #[error("Connection {0} already registered")]
    Duplicate(ConnectionId),
}
