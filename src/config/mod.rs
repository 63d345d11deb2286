mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    for warning in validate_config(&config)? {
        tracing::warn!("{}", warning);
    }

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./vttsource.toml", "~/.config/vttsource/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration. Hard errors fail; questionable but usable
/// settings come back as warnings.
pub fn validate_config(config: &Config) -> Result<Vec<String>> {
    config
        .buffer
        .validate()
        .context("Invalid [buffer] settings")?;

    let mut warnings = Vec::new();
    if let Some(capacity) = config.buffer.capacity_bytes {
        if capacity < 1024 {
            warnings.push(format!(
                "buffer.capacity_bytes = {} is very small; most appends will fill the buffer",
                capacity
            ));
        }
    }
    if config.dump.max_string_len == 0 {
        warnings.push("dump.max_string_len = 0 disables truncation".to_string());
    }
    Ok(warnings)
}
