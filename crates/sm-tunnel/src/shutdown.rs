//! Tunnel teardown with escalation
//!
//! 1. Terminate every logical connection and close our write side.
//! 2. Wait up to one grace period for the transport to finish.
//! 3. Send SIGTERM to the remote process and wait another grace period.
//! 4. Force the transport closed.

use std::time::Duration;

use sm_mux::Forwarder;

use crate::transport::TransportControl;

/// How far shutdown had to escalate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The peer wound down on its own
    Graceful,
    /// The peer exited after SIGTERM
    AfterSignal,
    /// The transport was cut
    Forced,
}

/// Close the tunnel, escalating when the peer does not respond
pub async fn shutdown(
    forwarder: &Forwarder,
    control: &dyn TransportControl,
    grace: Duration,
) -> ShutdownOutcome {
    forwarder.terminate_all().await;

    if wait_closed(forwarder, grace).await {
        tracing::info!("Tunnel closed");
        return ShutdownOutcome::Graceful;
    }

    tracing::warn!(
        "Remote side did not close within {:?}, sending SIGTERM",
        grace
    );
    if let Err(e) = control.signal_terminate().await {
        tracing::warn!("Failed to send SIGTERM: {}", e);
    }

    if wait_closed(forwarder, grace).await {
        tracing::info!("Tunnel closed after SIGTERM");
        return ShutdownOutcome::AfterSignal;
    }

    tracing::error!("Remote side still running, forcing the transport closed");
    if let Err(e) = control.force_close().await {
        tracing::warn!("Failed to force the transport closed: {}", e);
    }
    tracing::error!("IMPORTANT: This might leave files in remote host");
    ShutdownOutcome::Forced
}

async fn wait_closed(forwarder: &Forwarder, grace: Duration) -> bool {
    tokio::time::timeout(grace, forwarder.closed()).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sm_core::TransportError;
    use sm_mux::{ForwarderSettings, Role};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, DuplexStream};

    /// Peer end of the transport plus counters for each escalation step
    #[derive(Default)]
    struct MockControl {
        peer: Mutex<Option<DuplexStream>>,
        /// Drop the peer (the remote exits) when signalled
        exit_on_signal: bool,
        signals: AtomicUsize,
        force_closes: AtomicUsize,
    }

    impl MockControl {
        fn take_peer(&self) -> Option<DuplexStream> {
            self.peer.lock().unwrap().take()
        }
    }

    #[async_trait]
    impl TransportControl for MockControl {
        async fn signal_terminate(&self) -> Result<(), TransportError> {
            self.signals.fetch_add(1, Ordering::SeqCst);
            if self.exit_on_signal {
                drop(self.take_peer());
            }
            Ok(())
        }

        async fn force_close(&self) -> Result<(), TransportError> {
            self.force_closes.fetch_add(1, Ordering::SeqCst);
            drop(self.take_peer());
            Ok(())
        }
    }

    fn forwarder_with_peer() -> (Forwarder, DuplexStream) {
        let (local, peer) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let forwarder = Forwarder::spawn(reader, writer, Role::Listener, ForwarderSettings::default());
        (forwarder, peer)
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_when_peer_follows_eof() {
        let (forwarder, mut peer) = forwarder_with_peer();
        let control = MockControl::default();

        // A well-behaved agent exits once its input ends
        tokio::spawn(async move {
            let mut sink = Vec::new();
            let _ = peer.read_to_end(&mut sink).await;
        });

        let outcome = shutdown(&forwarder, &control, Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert_eq!(control.signals.load(Ordering::SeqCst), 0);
        assert_eq!(control.force_closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_sent_once_when_peer_lingers() {
        let (forwarder, peer) = forwarder_with_peer();
        let control = MockControl {
            peer: Mutex::new(Some(peer)),
            exit_on_signal: true,
            ..Default::default()
        };

        let outcome = shutdown(&forwarder, &control, Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::AfterSignal);
        assert_eq!(control.signals.load(Ordering::SeqCst), 1);
        assert_eq!(control.force_closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_when_peer_unresponsive() {
        let (forwarder, peer) = forwarder_with_peer();
        let control = MockControl {
            peer: Mutex::new(Some(peer)),
            ..Default::default()
        };

        let started = tokio::time::Instant::now();
        let outcome = shutdown(&forwarder, &control, Duration::from_secs(5)).await;

        assert_eq!(outcome, ShutdownOutcome::Forced);
        assert_eq!(control.signals.load(Ordering::SeqCst), 1);
        assert_eq!(control.force_closes.load(Ordering::SeqCst), 1);
        // Bounded by two grace periods
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_closed_transport_is_graceful() {
        let (forwarder, peer) = forwarder_with_peer();
        drop(peer);
        forwarder.closed().await;

        let control = MockControl::default();
        let outcome = shutdown(&forwarder, &control, Duration::from_secs(5)).await;
        assert_eq!(outcome, ShutdownOutcome::Graceful);
    }
}
