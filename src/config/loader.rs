// Configuration loader with environment variable substitution

use super::types::*;
use crate::sampler::clamp_rate;
use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ReplayConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read config file")?;

        Self::parse(&content)
    }

    /// Parse YAML text, substitute variables, clamp rates and validate
    pub fn parse(content: &str) -> Result<ReplayConfig> {
        let content = Self::substitute_env_vars(content)?;

        let mut config: ReplayConfig = serde_yaml::from_str(&content)
            .context("Failed to parse YAML configuration")?;

        Self::normalize(&mut config);
        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${REPLAY_URL:-http://localhost:8000} -> http://localhost:8000 (if REPLAY_URL not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}")
            .context("Invalid substitution pattern")?;

        Ok(re
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default_value = caps.get(2).map(|m| m.as_str());

                match std::env::var(var_name) {
                    Ok(value) => value,
                    Err(_) => match default_value {
                        Some(default) => default.to_string(),
                        // Keep original if no default and var not found
                        None => format!("${{{}}}", var_name),
                    },
                }
            })
            .to_string())
    }

    /// Out-of-range sample rates are clamped, never rejected
    pub fn normalize(config: &mut ReplayConfig) {
        config.sampling.session_sample_rate =
            clamp_rate("sampling.session_sample_rate", config.sampling.session_sample_rate);
        config.sampling.error_sample_rate =
            clamp_rate("sampling.error_sample_rate", config.sampling.error_sample_rate);
    }

    /// Validate configuration
    pub(crate) fn validate(config: &ReplayConfig) -> Result<()> {
        if config.flush.min_delay_ms == 0 {
            bail!("flush.min_delay_ms must be > 0");
        }

        if config.flush.max_delay_ms < config.flush.min_delay_ms {
            bail!("flush.max_delay_ms must be >= flush.min_delay_ms");
        }

        if config.buffer.max_buffered_events == 0 {
            bail!("buffer.max_buffered_events must be > 0");
        }

        if config.delivery.max_queue_size == 0 {
            bail!("delivery.max_queue_size must be > 0");
        }

        if config.delivery.max_retry_attempts == 0 {
            bail!("delivery.max_retry_attempts must be > 0");
        }

        if config.delivery.max_event_bytes == 0 {
            bail!("delivery.max_event_bytes must be > 0");
        }

        if config.delivery.compression_level > 4 {
            bail!("delivery.compression_level must be 0-4");
        }

        if config.session.idle_timeout_ms == 0 || config.session.max_session_life_ms == 0 {
            bail!("session timeouts must be > 0");
        }

        match config.transport.backend.as_str() {
            "http" => {
                let Some(http) = config.transport.backend_config.as_http() else {
                    bail!("http backend selected but http config missing");
                };
                if http.url.is_empty() {
                    bail!("transport.http.url cannot be empty");
                }
            }
            "filesystem" => {
                if config.transport.backend_config.as_filesystem().is_none() {
                    bail!("filesystem backend selected but filesystem config missing");
                }
            }
            unknown => bail!("Unknown backend: '{}'. Supported: http, filesystem", unknown),
        }

        Ok(())
    }
}
