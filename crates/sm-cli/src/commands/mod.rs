//! CLI command implementations

mod agent;
mod config;
mod server;
mod transparent;

pub use agent::agent_command;
pub use config::{config_init, config_path, config_show};
pub use server::{parse_destination, server_command, ServerArgs};
pub use transparent::transparent_command;
