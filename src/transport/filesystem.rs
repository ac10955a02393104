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

// Filesystem transport implementation

use super::backend::Transport;
use crate::codec::EncodedSegment;
use crate::config::FilesystemConfig;
use crate::error::DeliveryError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Writes each segment to `<base>/<session_id>/<segment_index>.replay`
pub struct FilesystemTransport {
    base_path: PathBuf,
}

impl FilesystemTransport {
    pub fn new(config: FilesystemConfig) -> Result<Self> {
        let base_path = PathBuf::from(&config.base_path);

        info!(
            "Initializing filesystem transport at: {}",
            base_path.display()
        );

        Ok(Self { base_path })
    }

    /// Get the file path for a given session and segment
    pub fn segment_path(&self, session_id: Uuid, segment_index: u32) -> PathBuf {
        self.base_path
            .join(session_id.to_string())
            .join(format!("{:06}.replay", segment_index))
    }

    /// Get metadata file path for storing labels
    pub fn metadata_path(&self, session_id: Uuid, segment_index: u32) -> PathBuf {
        self.base_path
            .join(session_id.to_string())
            .join(format!("{:06}.meta.json", segment_index))
    }

    async fn write_file(path: &PathBuf, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(data).await?;
        file.flush().await
    }
}

fn io_failure(e: std::io::Error) -> DeliveryError {
    DeliveryError::Transient(e.to_string())
}

#[async_trait]
impl Transport for FilesystemTransport {
    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .context("Failed to create base directory")
    }

    async fn send(&self, segment: &EncodedSegment) -> std::result::Result<(), DeliveryError> {
        let session_dir = self.base_path.join(segment.session_id().to_string());
        fs::create_dir_all(&session_dir).await.map_err(io_failure)?;

        let envelope = segment.to_envelope().map_err(|e| DeliveryError::Rejected {
            status: 0,
            message: e.to_string(),
        })?;
        let labels = serde_json::to_vec_pretty(&segment.labels).map_err(|e| {
            DeliveryError::Rejected {
                status: 0,
                message: e.to_string(),
            }
        })?;

        let file_path = self.segment_path(segment.session_id(), segment.segment_index());
        let metadata_path = self.metadata_path(segment.session_id(), segment.segment_index());

        debug!("Writing {} bytes to {}", envelope.len(), file_path.display());
        Self::write_file(&file_path, &envelope).await.map_err(io_failure)?;
        Self::write_file(&metadata_path, &labels).await.map_err(io_failure)?;

        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        match fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => {
                let test_file = self.base_path.join(".health_check_test");
                match Self::write_file(&test_file, b"test").await {
                    Ok(()) => {
                        let _ = fs::remove_file(&test_file).await;
                        Ok(true)
                    }
                    Err(e) => {
                        warn!("Health check failed - cannot write: {}", e);
                        Ok(false)
                    }
                }
            }
            Ok(_) => {
                warn!(
                    "Health check failed - base path is not a directory: {}",
                    self.base_path.display()
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Health check failed - cannot access base path {}: {}",
                    self.base_path.display(),
                    e
                );
                Ok(false)
            }
        }
    }

    fn transport_type(&self) -> &str {
        "filesystem"
    }
}
