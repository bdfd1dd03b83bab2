//! `sshmux agent`: remote endpoint over stdin/stdout

use sm_core::TunnelConfig;
use sm_tunnel::{run_stdio_agent, AgentOptions};

/// Run the agent until its transport closes
pub async fn agent_command(config: &TunnelConfig, target: Option<String>, remove_self: bool) {
    let options = AgentOptions::from_config(config, target, remove_self);
    run_stdio_agent(options).await;
}
