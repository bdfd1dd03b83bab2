//! Tunnel lifecycle
//!
//! ```text
//! Connecting ──▶ Open ──▶ Closing ──▶ Closed
//! ```
//!
//! `Open → Closing` happens on the caller's shutdown signal or when the
//! transport dies, whichever comes first.

use std::future::Future;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use sm_core::TunnelConfig;
use sm_mux::{Forwarder, ForwarderSettings, Role};

use crate::error::TunnelError;
use crate::listener::LocalListener;
use crate::shutdown::{shutdown, ShutdownOutcome};
use crate::transport::Transport;

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Transport being established
    Connecting,
    /// Forwarder running, listener accepting
    Open,
    /// Teardown in progress
    Closing,
    /// Everything released
    Closed,
}

/// Local end of a tunnel: accept loop plus forwarder
pub struct Tunnel {
    config: TunnelConfig,
    state: watch::Sender<TunnelState>,
}

impl Tunnel {
    /// Create a tunnel in the `Connecting` state
    pub fn new(config: TunnelConfig) -> Self {
        let (state, _) = watch::channel(TunnelState::Connecting);
        Self { config, state }
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Bind the local listener; failure aborts startup
    pub async fn bind(addr: &str) -> Result<TcpListener, TunnelError> {
        TcpListener::bind(addr)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: addr.to_string(),
                source,
            })
    }

    /// Carry connections accepted on `listener` over `transport` until
    /// `signal` resolves or the transport dies, then shut down.
    pub async fn run<F>(
        &self,
        listener: TcpListener,
        transport: Transport,
        signal: F,
    ) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        let Transport {
            reader,
            writer,
            control,
        } = transport;

        let forwarder = Forwarder::spawn(
            reader,
            writer,
            Role::Listener,
            ForwarderSettings::from(&self.config),
        );

        let cancel = CancellationToken::new();
        let accept_loop = tokio::spawn(
            LocalListener::new(listener, forwarder.context().clone(), cancel.clone()).run(),
        );
        self.state.send_replace(TunnelState::Open);
        tracing::info!("Tunnel open");

        tokio::select! {
            _ = signal => tracing::info!("Shutdown requested"),
            _ = forwarder.closed() => tracing::warn!("Transport closed"),
        }

        self.state.send_replace(TunnelState::Closing);
        cancel.cancel();
        if let Err(e) = accept_loop.await {
            tracing::debug!("Accept loop ended abnormally: {}", e);
        }

        let outcome = shutdown(&forwarder, control.as_ref(), self.config.close_grace_period).await;

        drop(forwarder);
        drop(control);
        self.state.send_replace(TunnelState::Closed);
        outcome
    }
}
