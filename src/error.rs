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

//! Error types for the capture pipeline.

use crate::protocol::ReplayMode;
use thiserror::Error;

/// Errors raised inside the recorder. None of these reach the host's control flow.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Illegal mode transition: {from} -> {to}")]
    IllegalTransition { from: ReplayMode, to: ReplayMode },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Recorder is shut down")]
    ShutDown,
}

pub type ReplayResult<T> = std::result::Result<T, ReplayError>;

/// Outcome of a failed send
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Transport offline")]
    Offline,

    #[error("Transient delivery failure: {0}")]
    Transient(String),

    #[error("Segment rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl DeliveryError {
    /// Rejected payloads are dropped immediately, everything else is retried
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Rejected { .. })
    }
}
