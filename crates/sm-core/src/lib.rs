//! sm-core: Core configuration and error types for sshmux
//!
//! This crate provides the configuration structures and error taxonomy
//! shared by the multiplexing engine, the tunnel orchestration and the CLI.

pub mod config;
pub mod error;
pub mod shell;

pub use config::TunnelConfig;
pub use error::{ConfigError, TransportError};
