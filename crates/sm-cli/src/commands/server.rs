//! `sshmux server`: tunnel over an SSH session

use std::path::PathBuf;

use anyhow::{Context, Result};

use sm_core::TunnelConfig;
use sm_tunnel::{connect_ssh, shutdown_signal, Tunnel};

/// Command-line overrides for an SSH tunnel
#[derive(Debug, Default)]
pub struct ServerArgs {
    /// Local address to accept connections on
    pub bind: String,
    /// `[user@]host[:port]`
    pub destination: String,
    /// SSH user, wins over one given in the destination
    pub user: Option<String>,
    /// Private key for public key authentication
    pub identity: Option<PathBuf>,
    /// SSH password
    pub password: Option<String>,
    /// Address the agent dials on the remote side
    pub target: Option<String>,
}

/// Split `[user@]host` into its parts
pub fn parse_destination(destination: &str) -> (Option<String>, String) {
    match destination.rsplit_once('@') {
        Some((user, host)) if !user.is_empty() => (Some(user.to_string()), host.to_string()),
        Some((_, host)) => (None, host.to_string()),
        None => (None, destination.to_string()),
    }
}

fn apply(mut config: TunnelConfig, args: ServerArgs) -> TunnelConfig {
    let (user, host) = parse_destination(&args.destination);
    config.remote_host = host;
    if let Some(user) = args.user.or(user) {
        config.user = Some(user);
    }
    if let Some(identity) = args.identity {
        config.private_key = Some(identity);
    }
    if let Some(password) = args.password {
        config.password = Some(password);
    }
    if let Some(target) = args.target {
        config.agent_target = target;
    }
    config
}

/// Run an SSH tunnel until interrupted or the remote side goes away
pub async fn server_command(config: TunnelConfig, args: ServerArgs, verbosity: u8) -> Result<()> {
    let bind = args.bind.clone();
    let config = apply(config, args);

    let listener = Tunnel::bind(&bind).await?;
    let transport = connect_ssh(&config, verbosity)
        .await
        .with_context(|| format!("Failed to open tunnel to {}", config.remote_address()))?;

    let tunnel = Tunnel::new(config);
    let outcome = tunnel.run(listener, transport, shutdown_signal()).await;
    tracing::debug!("Tunnel finished: {:?}", outcome);
    Ok(())
}
