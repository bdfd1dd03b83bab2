//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::shell::escape_argument;

/// Port appended to `remote_host` when it carries none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// File name the agent binary is uploaded as, inside `remote_agent_path`
pub const AGENT_FILE_NAME: &str = ".daemon";

/// Configuration for one tunnel (SSH or transparent) and its agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// SSH server, `host` or `host:port`
    pub remote_host: String,

    /// SSH user (defaults to the current OS user)
    pub user: Option<String>,

    /// SSH password; prompted for when unset
    pub password: Option<String>,

    /// Private key tried before password authentication
    pub private_key: Option<PathBuf>,

    /// Binary uploaded as the remote agent (defaults to this executable)
    pub remote_executable: Option<PathBuf>,

    /// Remote directory the agent is installed into
    pub remote_agent_path: String,

    /// Address the agent dials for every new logical connection
    pub agent_target: String,

    /// SSH connect timeout
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Interval between keepalive frames
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// Wait applied at each shutdown escalation step
    #[serde(with = "duration_secs")]
    pub close_grace_period: Duration,

    /// Capacity of the inbound and outbound frame queues
    pub queue_capacity: usize,

    /// Ceiling on concurrently open logical connections
    pub max_connections: Option<usize>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            remote_host: String::new(),
            user: None,
            password: None,
            private_key: None,
            remote_executable: None,
            remote_agent_path: ".".to_string(),
            agent_target: "127.0.0.1:1080".to_string(),
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
            close_grace_period: Duration::from_secs(5),
            queue_capacity: 10,
            max_connections: None,
        }
    }
}

impl TunnelConfig {
    /// SSH address with the default port filled in
    pub fn remote_address(&self) -> String {
        if has_port(&self.remote_host) {
            self.remote_host.clone()
        } else {
            format!("{}:{}", self.remote_host, DEFAULT_SSH_PORT)
        }
    }

    /// SSH user, falling back to the current OS user
    pub fn username(&self) -> String {
        self.user
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(whoami::username)
    }

    /// Binary to upload, falling back to this process's executable
    pub fn remote_executable(&self) -> Result<PathBuf, ConfigError> {
        match &self.remote_executable {
            Some(path) => Ok(path.clone()),
            None => std::env::current_exe().map_err(|e| {
                ConfigError::Invalid(format!("Cannot locate own executable: {}", e))
            }),
        }
    }

    /// Remote shell command that stores stdin as the agent binary
    pub fn upload_command(&self) -> String {
        format!(
            "cd {} && cat > ./{name} && chmod +x ./{name}",
            escape_argument(&self.remote_agent_path),
            name = AGENT_FILE_NAME
        )
    }

    /// Remote shell command that runs the uploaded agent
    ///
    /// `verbosity` is the repeat count of the local `-v` flag.
    pub fn agent_command(&self, verbosity: u8) -> String {
        let mut command = format!(
            "cd {} && ./{} agent --remove-self --target {}",
            escape_argument(&self.remote_agent_path),
            AGENT_FILE_NAME,
            escape_argument(&self.agent_target)
        );
        if verbosity > 0 {
            command.push_str(" -");
            command.push_str(&"v".repeat(verbosity as usize));
        }
        command
    }

    /// Check the settings the SSH tunnel cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_host.is_empty() {
            return Err(ConfigError::MissingField("remote_host".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "keepalive_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether `host` already ends in a port, accounting for bracketed IPv6
fn has_port(host: &str) -> bool {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.contains("]:");
    }
    host.matches(':').count() == 1
}
