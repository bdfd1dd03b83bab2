//! sm-tunnel: Tunnel orchestration for sshmux
//!
//! Wires a [`sm_mux::Forwarder`] to a transport and drives it from startup
//! to teardown:
//!
//! - [`transport`]: SSH session (with agent self-upload) or local subprocess
//! - [`listener`]: local accept loop feeding the forwarder
//! - [`tunnel`]: lifecycle state machine
//! - [`shutdown`]: escalating teardown (EOF, SIGTERM, forced close)
//! - [`agent`]: the remote endpoint, run by the same binary

pub mod agent;
pub mod error;
pub mod listener;
pub mod shutdown;
pub mod signal;
pub mod transport;
pub mod tunnel;

pub use agent::{run_agent, run_stdio_agent, AgentOptions};
pub use error::TunnelError;
pub use listener::LocalListener;
pub use shutdown::{shutdown, ShutdownOutcome};
pub use signal::shutdown_signal;
pub use transport::{connect_ssh, spawn_transparent, Transport, TransportControl};
pub use tunnel::{Tunnel, TunnelState};
