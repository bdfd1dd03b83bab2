//! sm-mux: Connection multiplexing engine for sshmux
//!
//! Carries any number of TCP connections over one duplex byte stream.
//! Each accepted socket becomes a [`Client`] registered in the
//! [`Registry`]; its bytes travel as frames through the [`Forwarder`],
//! which owns the only reader and the only writer of the transport.

pub mod client;
pub mod dialer;
pub mod error;
pub mod forwarder;
pub mod keepalive;
pub mod registry;

pub use client::{BoxedReader, BoxedWriter, Client, ClientState};
pub use dialer::{Dialer, Role, TcpDialer};
pub use error::{ClientError, RegistryError};
pub use forwarder::{Forwarder, ForwarderContext, ForwarderSettings};
pub use registry::Registry;
