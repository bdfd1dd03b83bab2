//! Transports a forwarder can run over
//!
//! A [`Transport`] is a duplex byte stream plus a [`TransportControl`] used
//! only while shutting down, when the peer has to be nudged or cut off.

pub mod ssh;
pub mod transparent;

use async_trait::async_trait;

use sm_core::TransportError;
use sm_mux::{BoxedReader, BoxedWriter};

pub use ssh::connect_ssh;
pub use transparent::spawn_transparent;

/// Out-of-band control over the process at the far end of a transport
#[async_trait]
pub trait TransportControl: Send + Sync {
    /// Ask the remote process to exit (SIGTERM)
    async fn signal_terminate(&self) -> Result<(), TransportError>;

    /// Tear the transport down without waiting for the peer
    async fn force_close(&self) -> Result<(), TransportError>;
}

/// An established transport
pub struct Transport {
    /// Bytes from the peer
    pub reader: BoxedReader,
    /// Bytes to the peer
    pub writer: BoxedWriter,
    /// Shutdown control
    pub control: Box<dyn TransportControl>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
