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

// Transport trait for segment delivery

use anyhow::Result;
use async_trait::async_trait;

use crate::codec::EncodedSegment;
use crate::error::DeliveryError;

/// Sends encoded segments to their destination
///
/// A single call is a single attempt. Implementations classify failures:
/// [`DeliveryError::Rejected`] for payloads the destination will never
/// accept, anything else for conditions worth retrying.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the destination (create directories, check credentials)
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Send one segment
    async fn send(&self, segment: &EncodedSegment) -> std::result::Result<(), DeliveryError>;

    /// Health check
    async fn health_check(&self) -> Result<bool>;

    /// Get transport type identifier
    fn transport_type(&self) -> &str;
}
