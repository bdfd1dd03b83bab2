//! Configuration management for sshmux

mod serde_utils;
mod tunnel;

pub use serde_utils::duration_secs;
pub use tunnel::{TunnelConfig, AGENT_FILE_NAME, DEFAULT_SSH_PORT};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sshmux")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load `path` if given, else the default config file if it exists, else defaults.
///
/// An explicitly given file must exist; a broken default file only logs a warning.
pub fn load_or_default<T>(path: Option<&Path>) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if let Some(path) = path {
        return load_config(path);
    }

    let default_path = default_config_path();
    if !default_path.exists() {
        tracing::debug!("No config file at {:?}, using defaults", default_path);
        return Ok(T::default());
    }

    Ok(load_config(&default_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
        T::default()
    }))
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TunnelConfig::default();
        config.remote_host = "bastion.example.com".to_string();
        config.max_connections = Some(64);
        save_config(&path, &config).unwrap();

        let loaded: TunnelConfig = load_config(&path).unwrap();
        assert_eq!(loaded.remote_host, "bastion.example.com");
        assert_eq!(loaded.max_connections, Some(64));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let result: Result<TunnelConfig, _> = load_or_default(Some(&path));
        assert!(matches!(result, Err(ConfigError::NotFound(p)) if p == path));
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "remote_host = [").unwrap();

        let result: Result<TunnelConfig, _> = load_config(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
