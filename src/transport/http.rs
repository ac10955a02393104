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

// HTTP ingest transport

use super::backend::Transport;
use crate::codec::EncodedSegment;
use crate::config::HttpConfig;
use crate::error::DeliveryError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Posts segment envelopes to an ingest endpoint
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self> {
        let mut client_builder = reqwest::ClientBuilder::new()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(Duration::from_secs(config.timeout_seconds));

        // Add API token if provided
        if let Some(token) = &config.api_token {
            let mut headers = reqwest::header::HeaderMap::new();
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth_value).context("Invalid API token")?,
            );
            client_builder = client_builder.default_headers(headers);
        }

        let client = client_builder
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.url,
        })
    }
}

/// Map a response status to a delivery outcome
pub fn classify_status(status: StatusCode, body: String) -> std::result::Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        return Err(DeliveryError::Transient(format!("status {}: {}", status, body)));
    }
    Err(DeliveryError::Rejected {
        status: status.as_u16(),
        message: body,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, segment: &EncodedSegment) -> std::result::Result<(), DeliveryError> {
        let envelope = segment
            .to_envelope()
            .map_err(|e| DeliveryError::Rejected {
                status: 0,
                message: e.to_string(),
            })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-replay-envelope");

        // Add labels as headers
        for (key, value) in &segment.labels {
            request = request.header(format!("x-replay-{}", key), value);
        }

        let response = request.body(envelope).send().await.map_err(|e| {
            if e.is_connect() {
                DeliveryError::Offline
            } else {
                DeliveryError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        let body = if status.is_success() {
            String::new()
        } else {
            response.text().await.unwrap_or_default()
        };

        debug!(
            "POST segment {} of session {} -> {}",
            segment.segment_index(),
            segment.session_id(),
            status
        );
        classify_status(status, body)
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.head(&self.url).send().await {
            Ok(response) if !response.status().is_server_error() => Ok(true),
            Ok(response) => {
                warn!("Health check failed with status: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn transport_type(&self) -> &str {
        "http"
    }
}
