//! Core error types for sshmux

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a tunnel before or while it is open.
///
/// None of these are retried.
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP/SSH dial failed
    #[error("Dial error: {0}")]
    Dial(String),

    /// Connect attempt exceeded the configured timeout
    #[error("Connection to {0} timed out")]
    Timeout(String),

    /// Every authentication method was rejected
    #[error("Authentication failed for user {0}")]
    AuthenticationFailed(String),

    /// Private key could not be loaded
    #[error("Unable to load private key {path}: {message}")]
    PrivateKey { path: PathBuf, message: String },

    /// Session channel could not be opened or driven
    #[error("Session error: {0}")]
    Session(String),

    /// Uploading the agent binary failed
    #[error("Failed to upload agent: {0}")]
    Upload(String),

    /// Transparent-mode process could not be started
    #[error("Failed to spawn transport process: {0}")]
    Spawn(String),

    /// Remote agent or transport process exited
    #[error("Remote process is dead")]
    RemoteDead,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
