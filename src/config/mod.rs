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

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./imgbatch.toml",
        "./config.toml",
        "~/.config/imgbatch/config.toml",
        "/etc/imgbatch/config.toml",
    ];

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

/// Render a configuration as TOML, as `validate` prints it
pub fn render_config(config: &Config) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to serialize config")
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    // Validate converter
    if config.converter.program.trim().is_empty() {
        anyhow::bail!("Converter program cannot be empty");
    }
    if config.converter.timeout.is_zero() {
        anyhow::bail!("Converter timeout_secs cannot be 0");
    }
    if !config.converter.args.iter().any(|a| a.contains("{format}")) {
        tracing::warn!("Converter args never mention {{format}}; every job will produce the same format");
    }

    // Validate limits
    if config.limits.max_files == 0 {
        anyhow::bail!("limits.max_files cannot be 0");
    }
    if config.limits.max_file_bytes == 0 {
        anyhow::bail!("limits.max_file_bytes cannot be 0");
    }
    if config.limits.max_concurrent_jobs == 0 {
        anyhow::bail!("limits.max_concurrent_jobs cannot be 0");
    }
    if config.limits.max_files > u16::MAX as usize {
        anyhow::bail!(
            "limits.max_files {} exceeds the ZIP entry limit of {}",
            config.limits.max_files,
            u16::MAX
        );
    }

    // Validate archive
    if config.archive.compression_level > 9 {
        anyhow::bail!(
            "archive.compression_level must be 0-9, got {}",
            config.archive.compression_level
        );
    }
    if config.archive.filename.trim().is_empty() {
        anyhow::bail!("archive.filename cannot be empty");
    }

    Ok(())
}
