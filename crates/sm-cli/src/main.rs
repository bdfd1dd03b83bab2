//! sshmux CLI
//!
//! Single binary for both ends of a tunnel:
//! - `server`: local listener tunnelled over SSH to an uploaded agent
//! - `transparent`: local listener tunnelled over a command's stdio
//! - `agent`: the remote endpoint, speaking the protocol on stdin/stdout

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sm_core::config::{self, TunnelConfig};
use sshmux::commands::{self, ServerArgs};
use sshmux::logging;

#[derive(Parser)]
#[command(name = "sshmux")]
#[command(author, version, about = "Multiplex TCP connections over a single SSH session")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "SSHMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tunnel local connections over SSH, uploading the agent to the remote host
    Server {
        /// Local address to accept connections on
        #[arg(short, long, env = "SSHMUX_BIND")]
        bind: String,
        /// Remote host, as [user@]host[:port]
        destination: String,
        /// SSH user (defaults to the one in the destination, then the current user)
        #[arg(short, long)]
        user: Option<String>,
        /// Private key for public key authentication
        #[arg(short, long)]
        identity: Option<PathBuf>,
        /// SSH password (prompted for when neither this nor a key works)
        #[arg(long, env = "SSHMUX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// Address the agent connects to on the remote side
        #[arg(short, long)]
        target: Option<String>,
    },

    /// Tunnel local connections over the stdin/stdout of a command
    Transparent {
        /// Local address to accept connections on
        #[arg(short, long, env = "SSHMUX_BIND")]
        bind: String,
        /// Command to run, e.g. `-- ssh host ./sshmux agent`
        #[arg(required = true, last = true)]
        command: Vec<String>,
    },

    /// Run the remote endpoint on stdin/stdout
    Agent {
        /// Address to connect to for each tunnelled connection
        #[arg(short, long)]
        target: Option<String>,
        /// Delete this executable on exit
        #[arg(long)]
        remove_self: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a configuration file with the defaults
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the configuration file path
    Path,
}

fn load_config(path: Option<&PathBuf>) -> Result<TunnelConfig> {
    config::load_or_default(path.map(PathBuf::as_path))
        .with_context(|| "Failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Server {
            bind,
            destination,
            user,
            identity,
            password,
            target,
        } => {
            let config = load_config(cli.config.as_ref())?;
            let args = ServerArgs {
                bind,
                destination,
                user,
                identity,
                password,
                target,
            };
            commands::server_command(config, args, cli.verbose).await?;
        }

        Commands::Transparent { bind, command } => {
            let config = load_config(cli.config.as_ref())?;
            commands::transparent_command(config, &bind, &command).await?;
        }

        Commands::Agent {
            target,
            remove_self,
        } => {
            let config = load_config(cli.config.as_ref())?;
            commands::agent_command(&config, target, remove_self).await;
            // The stdin reader thread may still be blocked and would keep the runtime alive
            std::process::exit(0);
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.config.as_deref())?,
            ConfigAction::Init { force } => commands::config_init(cli.config.as_deref(), force)?,
            ConfigAction::Path => commands::config_path(cli.config.as_deref()),
        },
    }

    Ok(())
}
