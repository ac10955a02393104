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

// Transport factory for creating transports from configuration

use super::backend::Transport;
use super::filesystem::FilesystemTransport;
use super::http::HttpTransport;
use crate::config::TransportConfig;
use anyhow::{bail, Result};
use std::sync::Arc;

pub struct TransportFactory;

impl TransportFactory {
    /// Create transport from configuration
    pub fn create(config: &TransportConfig) -> Result<Arc<dyn Transport>> {
        match config.backend.as_str() {
            "http" => {
                let http_config = config
                    .backend_config
                    .as_http()
                    .ok_or_else(|| anyhow::anyhow!("HTTP transport config missing"))?;

                Ok(Arc::new(HttpTransport::new(http_config.clone())?))
            }

            "filesystem" => {
                let fs_config = config
                    .backend_config
                    .as_filesystem()
                    .ok_or_else(|| anyhow::anyhow!("Filesystem transport config missing"))?;

                Ok(Arc::new(FilesystemTransport::new(fs_config.clone())?))
            }

            unknown => bail!(
                "Unknown transport backend: '{}'. Supported: http, filesystem",
                unknown
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SegmentEncoder;
    use crate::config::{BackendConfig, FilesystemConfig, HttpConfig};
    use crate::error::DeliveryError;
    use crate::protocol::{
        CompressionLevel, CompressionType, RawRecordingEvent, ReplayMode, ReplayType, SampleRates,
        Segment,
    };
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn encoded() -> crate::codec::EncodedSegment {
        let segment = Segment {
            session_id: Uuid::new_v4(),
            segment_index: 0,
            mode: ReplayMode::Continuous,
            replay_type: ReplayType::Session,
            sample_rates: SampleRates::new(1.0, 0.0),
            replay_start_timestamp: Some(1),
            start_timestamp_ms: 1,
            end_timestamp_ms: 1,
            recording_events: vec![RawRecordingEvent::checkout(1, json!({}))],
            diagnostic_events: vec![],
            error_ids: vec![],
            contains_full_checkout: true,
        };
        SegmentEncoder::new(CompressionType::None, CompressionLevel::Fast)
            .encode(&segment)
            .unwrap()
    }

    fn http(config: HttpConfig) -> TransportConfig {
        TransportConfig {
            backend: "http".to_string(),
            backend_config: BackendConfig::Http { http: config },
        }
    }

    #[tokio::test]
    async fn test_filesystem_transport_writes_under_base_path() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("replays");
        let config = TransportConfig {
            backend: "filesystem".to_string(),
            backend_config: BackendConfig::Filesystem {
                filesystem: FilesystemConfig {
                    base_path: base.to_string_lossy().to_string(),
                },
            },
        };

        let transport = TransportFactory::create(&config).unwrap();
        transport.initialize().await.unwrap();
        let segment = encoded();
        transport.send(&segment).await.unwrap();

        assert!(base
            .join(segment.session_id().to_string())
            .join("000000.replay")
            .is_file());
    }

    #[tokio::test]
    async fn test_unreachable_http_endpoint_reports_offline() {
        let transport = TransportFactory::create(&http(HttpConfig {
            url: "http://127.0.0.1:1/api/replay".to_string(),
            api_token: None,
            timeout_seconds: 5,
        }))
        .unwrap();

        let result = transport.send(&encoded()).await;
        assert!(matches!(result, Err(DeliveryError::Offline)), "{:?}", result);
    }

    #[test]
    fn test_bad_api_token_fails_creation() {
        let result = TransportFactory::create(&http(HttpConfig {
            api_token: Some("line\nbreak".to_string()),
            ..HttpConfig::default()
        }));
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Invalid API token"));
    }

    #[test]
    fn test_backend_name_must_match_block() {
        let mut config = http(HttpConfig::default());
        config.backend = "filesystem".to_string();
        assert!(TransportFactory::create(&config).is_err());

        config.backend = "s3".to_string();
        let err = TransportFactory::create(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown transport backend"));
    }
}
