//! Local accept loop
//!
//! Every accepted socket becomes a logical connection named after its peer
//! address and an accept counter, so ids stay unique even when the OS
//! reuses a source port.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use sm_mux::ForwarderContext;
use sm_protocol::ConnectionId;

/// Accepts local clients and hands them to the forwarder
pub struct LocalListener {
    listener: TcpListener,
    ctx: ForwarderContext,
    cancel: CancellationToken,
    accepted: u64,
}

impl LocalListener {
    /// Create an accept loop feeding `ctx`
    pub fn new(listener: TcpListener, ctx: ForwarderContext, cancel: CancellationToken) -> Self {
        Self {
            listener,
            ctx,
            cancel,
            accepted: 0,
        }
    }

    /// Accept until cancelled or the tunnel stops carrying traffic
    pub async fn run(mut self) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Listening on {}", addr);
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Accept loop cancelled");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            if !self.ctx.is_open() {
                                tracing::debug!("Tunnel closing, dropping {}", peer_addr);
                                break;
                            }
                            self.handle_connection(socket, peer_addr).await;
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(&mut self, socket: TcpStream, peer_addr: SocketAddr) {
        if !self.ctx.registry().has_capacity() {
            tracing::warn!("Connection limit reached, refusing {}", peer_addr);
            return;
        }

        self.accepted += 1;
        let id = connection_id(peer_addr, self.accepted);
        if let Err(e) = socket.set_nodelay(true) {
            tracing::trace!("set_nodelay failed for {}: {}", peer_addr, e);
        }

        let (reader, writer) = socket.into_split();
        match self.ctx.accept(id, Box::new(reader), Box::new(writer)).await {
            Ok(client) => tracing::debug!("New connection {}", client.id()),
            Err(e) => tracing::warn!("Refusing {}: {}", peer_addr, e),
        }
    }
}

/// Identifier for the `seq`-th accepted connection
pub fn connection_id(peer_addr: SocketAddr, seq: u64) -> ConnectionId {
    ConnectionId::new(format!("{}#{}", peer_addr, seq))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique_per_accept() {
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        assert_eq!(connection_id(peer, 1).as_str(), "127.0.0.1:5000#1");
        assert_ne!(connection_id(peer, 1), connection_id(peer, 2));
    }
}
