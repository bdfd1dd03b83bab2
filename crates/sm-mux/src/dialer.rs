//! Which side of the tunnel a forwarder runs on

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use sm_protocol::ConnectionId;

use crate::client::{BoxedReader, BoxedWriter};

/// Opens the local socket for a connection the peer originated
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect the socket that will carry connection `id`
    async fn dial(&self, id: &ConnectionId) -> std::io::Result<(BoxedReader, BoxedWriter)>;
}

/// Dials a fixed TCP address for every connection
pub struct TcpDialer {
    target: String,
    timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer for `target` (`host:port`)
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }

    /// Address dialed for each connection
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, id: &ConnectionId) -> std::io::Result<(BoxedReader, BoxedWriter)> {
        tracing::debug!("Dialing {} for connection {}", self.target, id);

        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.target))
            .await
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

/// Role of a forwarder
#[derive(Clone)]
pub enum Role {
    /// Connections are accepted locally; frames for unknown ids are dropped
    Listener,
    /// Connections are originated by the peer; its empty announce frame for
    /// an unknown id opens one through the dialer
    Agent(Arc<dyn Dialer>),
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Listener => f.write_str("Listener"),
            Role::Agent(_) => f.write_str("Agent"),
        }
    }
}
