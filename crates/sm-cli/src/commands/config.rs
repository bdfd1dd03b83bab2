//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use sm_core::config::{self, TunnelConfig};

fn resolve(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path)
}

/// Print the configuration file path
pub fn config_path(config_path: Option<&Path>) {
    println!("{}", resolve(config_path).display());
}

/// Show the effective configuration
pub fn config_show(config_path: Option<&Path>) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() {
        print_info(&format!("Configuration file: {:?}", path));
    } else {
        print_warning(&format!("No configuration file at {:?}, showing defaults", path));
        print_info("Run 'sshmux config init' to create one");
    }
    println!();

    let config: TunnelConfig = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load {:?}", path))?;
    print!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}

/// Write a configuration file holding the defaults
pub fn config_init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &TunnelConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;
    print_success(&format!("Created configuration file: {:?}", path));

    Ok(())
}
