// Configuration module for session-replay
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Sample-rate clamping and validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ReplayConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<ReplayConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

/// Allow environment variables to override config values
pub fn apply_env_overrides(config: &mut ReplayConfig) -> Result<()> {
    if let Ok(rate) = std::env::var("REPLAY_SESSION_SAMPLE_RATE") {
        config.sampling.session_sample_rate = rate
            .parse()
            .context("REPLAY_SESSION_SAMPLE_RATE is not a number")?;
    }

    if let Ok(rate) = std::env::var("REPLAY_ERROR_SAMPLE_RATE") {
        config.sampling.error_sample_rate = rate
            .parse()
            .context("REPLAY_ERROR_SAMPLE_RATE is not a number")?;
    }

    if let Ok(url) = std::env::var("REPLAY_TRANSPORT_URL") {
        if let Some(http) = config.transport.backend_config.as_http_mut() {
            http.url = url;
        }
    }

    if let Ok(api_token) = std::env::var("REPLAY_API_TOKEN") {
        if let Some(http) = config.transport.backend_config.as_http_mut() {
            http.api_token = Some(api_token);
        }
    }

    ConfigLoader::normalize(config);
    Ok(())
}
