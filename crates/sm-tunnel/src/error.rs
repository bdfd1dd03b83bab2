//! Tunnel error type

use sm_core::{ConfigError, TransportError};
use thiserror::Error;

/// Errors that abort a tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The local listener could not be bound
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The transport could not be established
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Configuration was unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
