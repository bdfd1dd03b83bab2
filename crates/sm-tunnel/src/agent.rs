//! Remote agent runtime
//!
//! The agent is this same binary started on the remote host. Its stdin and
//! stdout are the transport; each new connection id announced by the local
//! side is dialed to the configured target.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use sm_core::TunnelConfig;
use sm_mux::{Dialer, Forwarder, ForwarderSettings, Role, TcpDialer};

use crate::signal::shutdown_signal;

/// Options for one agent run
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Address dialed for every new connection
    pub target: String,
    /// Dial timeout per connection
    pub connect_timeout: Duration,
    /// Longest wait for queued frames to reach the transport on exit
    pub flush_timeout: Duration,
    /// Delete the agent executable on exit
    pub remove_self: bool,
    /// Forwarder tunables
    pub settings: ForwarderSettings,
}

impl AgentOptions {
    /// Options from configuration, dialing `target` when given
    pub fn from_config(config: &TunnelConfig, target: Option<String>, remove_self: bool) -> Self {
        Self {
            target: target.unwrap_or_else(|| config.agent_target.clone()),
            connect_timeout: config.connect_timeout,
            flush_timeout: config.close_grace_period,
            remove_self,
            settings: ForwarderSettings::from(config),
        }
    }
}

/// Run the agent over this process's stdio until the transport closes or
/// the process is signalled
pub async fn run_stdio_agent(options: AgentOptions) {
    let dialer = Arc::new(TcpDialer::new(options.target.clone(), options.connect_timeout));
    tracing::info!("Agent started, forwarding to {}", options.target);

    run_agent(
        tokio::io::stdin(),
        tokio::io::stdout(),
        dialer,
        &options,
        shutdown_signal(),
    )
    .await;

    if options.remove_self {
        remove_own_executable();
    }
}

/// Run an agent forwarder over an arbitrary transport
pub async fn run_agent<R, W, F>(
    reader: R,
    writer: W,
    dialer: Arc<dyn Dialer>,
    options: &AgentOptions,
    signal: F,
) where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
    F: Future<Output = ()>,
{
    let forwarder = Forwarder::spawn(reader, writer, Role::Agent(dialer), options.settings.clone());

    tokio::select! {
        _ = forwarder.closed() => tracing::info!("Transport closed, agent exiting"),
        _ = signal => tracing::info!("Agent interrupted"),
    }

    forwarder.terminate_all().await;
    if tokio::time::timeout(options.flush_timeout, forwarder.flushed())
        .await
        .is_err()
    {
        tracing::warn!("Transport did not flush within {:?}", options.flush_timeout);
    }
}

fn remove_own_executable() {
    match std::env::current_exe() {
        Ok(path) => remove_file(&path),
        Err(e) => tracing::warn!("Cannot locate own executable: {}", e),
    }
}

fn remove_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!("Removed {}", path.display()),
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
