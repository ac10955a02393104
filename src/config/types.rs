// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Configuration types for session-replay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::delivery::RetryPolicy;
use crate::protocol::{CompressionLevel, CompressionType, SampleRates};
use crate::session::SessionLimits;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub flush: FlushConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default)]
    pub session_sample_rate: f64,
    #[serde(default = "default_error_sample_rate")]
    pub error_sample_rate: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            session_sample_rate: 0.0,
            error_sample_rate: default_error_sample_rate(),
        }
    }
}

impl SamplingConfig {
    pub fn rates(&self) -> SampleRates {
        SampleRates::new(self.session_sample_rate, self.error_sample_rate)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlushConfig {
    /// No cut sooner than this after the previous one
    #[serde(default = "default_flush_min_delay")]
    pub min_delay_ms: u64,

    /// Cut no later than this after the oldest unflushed content
    #[serde(default = "default_flush_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_flush_min_delay(),
            max_delay_ms: default_flush_max_delay(),
        }
    }
}

impl FlushConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Rolling-tail bound while buffering for an error
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,

    #[serde(default = "default_max_buffer_duration")]
    pub max_buffer_duration_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffered_events: default_max_buffered_events(),
            max_buffer_duration_ms: default_max_buffer_duration(),
        }
    }
}

impl BufferConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_buffer_duration_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_max_session_life")]
    pub max_session_life_ms: u64,

    /// Directory for the session record and the delivery log.
    /// Without it, nothing survives a restart.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    /// Resume a stored, unexpired session on start
    #[serde(default = "default_sticky")]
    pub sticky: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout(),
            max_session_life_ms: default_max_session_life(),
            state_dir: None,
            sticky: default_sticky(),
        }
    }
}

impl SessionConfig {
    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            max_session_life: Duration::from_millis(self.max_session_life_ms),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default)]
    pub compression: CompressionType,

    #[serde(default = "default_compression_level")]
    pub compression_level: u8,

    /// Serialized size above which a single recording event is dropped
    #[serde(default = "default_max_event_bytes")]
    pub max_event_bytes: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_retry_attempts: default_max_retry_attempts(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            compression: CompressionType::default(),
            compression_level: default_compression_level(),
            max_event_bytes: default_max_event_bytes(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
        }
    }

    pub fn level(&self) -> CompressionLevel {
        CompressionLevel::from_u8(self.compression_level)
    }
}

/// Transport configuration with backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Backend type: "http", "filesystem"
    pub backend: String,

    #[serde(flatten)]
    pub backend_config: BackendConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            backend_config: BackendConfig::Http {
                http: HttpConfig::default(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendConfig {
    Http {
        #[serde(rename = "http")]
        http: HttpConfig,
    },
    Filesystem {
        #[serde(rename = "filesystem")]
        filesystem: FilesystemConfig,
    },
}

impl BackendConfig {
    pub fn as_http(&self) -> Option<&HttpConfig> {
        match self {
            BackendConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_http_mut(&mut self) -> Option<&mut HttpConfig> {
        match self {
            BackendConfig::Http { http } => Some(http),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&FilesystemConfig> {
        match self {
            BackendConfig::Filesystem { filesystem } => Some(filesystem),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/api/replay".to_string(),
            api_token: None,
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemConfig {
    pub base_path: String,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            base_path: "/data/replays".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_error_sample_rate() -> f64 { 1.0 }
fn default_flush_min_delay() -> u64 { 5_000 }
fn default_flush_max_delay() -> u64 { 5_500 }
fn default_max_buffered_events() -> usize { 10_000 }
fn default_max_buffer_duration() -> u64 { 60_000 }
fn default_idle_timeout() -> u64 { 15 * 60 * 1000 }
fn default_max_session_life() -> u64 { 60 * 60 * 1000 }
fn default_sticky() -> bool { true }
fn default_max_queue_size() -> usize { 30 }
fn default_max_retry_attempts() -> u32 { 5 }
fn default_initial_retry_delay() -> u64 { 1_000 }
fn default_max_retry_delay() -> u64 { 30_000 }
fn default_compression_level() -> u8 { 2 }
fn default_max_event_bytes() -> usize { 1024 * 1024 }
fn default_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
