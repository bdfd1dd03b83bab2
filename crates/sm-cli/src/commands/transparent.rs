//! `sshmux transparent`: tunnel over a local command's stdio

use anyhow::{Context, Result};

use sm_core::TunnelConfig;
use sm_tunnel::{shutdown_signal, spawn_transparent, Tunnel};

/// Run a tunnel over `command` until interrupted or the command exits
pub async fn transparent_command(config: TunnelConfig, bind: &str, command: &[String]) -> Result<()> {
    let listener = Tunnel::bind(bind).await?;
    let transport = spawn_transparent(command)
        .with_context(|| format!("Failed to start {:?}", command))?;

    let tunnel = Tunnel::new(config);
    let outcome = tunnel.run(listener, transport, shutdown_signal()).await;
    tracing::debug!("Tunnel finished: {:?}", outcome);
    Ok(())
}
