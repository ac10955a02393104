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

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Recording mode of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplayMode {
    /// Not sampled: nothing is buffered, flushed or sent
    #[default]
    Off,
    /// Keep a rolling tail of recent events, send nothing until an error
    Buffering,
    /// Buffer everything and send on every scheduled flush
    Continuous,
}

impl ReplayMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayMode::Off => "off",
            ReplayMode::Buffering => "buffering",
            ReplayMode::Continuous => "continuous",
        }
    }
}

impl fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which sampling decision started the session.
///
/// Fixed at creation: a session upgraded from buffering keeps reporting `Buffer`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplayType {
    Session,
    Buffer,
}

impl ReplayType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayType::Session => "session",
            ReplayType::Buffer => "buffer",
        }
    }
}

/// Sample rates captured when a session is created
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SampleRates {
    pub session_sample_rate: f64,
    pub error_sample_rate: f64,
}

impl SampleRates {
    /// Build sample rates, clamping both into [0, 1]
    pub fn new(session_sample_rate: f64, error_sample_rate: f64) -> Self {
        Self {
            session_sample_rate: crate::sampler::clamp_rate("session_sample_rate", session_sample_rate),
            error_sample_rate: crate::sampler::clamp_rate("error_sample_rate", error_sample_rate),
        }
    }
}

/// Kind of a raw recording event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingEventKind {
    /// Full baseline, sufficient to reconstruct state without prior segments
    Checkout,
    /// Delta against the previous state
    Incremental,
}

/// Opaque timestamped payload from the UI-recording producer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawRecordingEvent {
    pub timestamp_ms: u64,
    pub kind: RecordingEventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawRecordingEvent {
    pub fn checkout(timestamp_ms: u64, payload: serde_json::Value) -> Self {
        Self {
            timestamp_ms,
            kind: RecordingEventKind::Checkout,
            payload,
        }
    }

    pub fn incremental(timestamp_ms: u64, payload: serde_json::Value) -> Self {
        Self {
            timestamp_ms,
            kind: RecordingEventKind::Incremental,
            payload,
        }
    }

    pub fn is_checkout(&self) -> bool {
        self.kind == RecordingEventKind::Checkout
    }
}

/// Breadcrumb severity
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    Debug,
    #[default]
    Info,
    Log,
    Warning,
    Error,
    Fatal,
}

/// Small structured diagnostic record (breadcrumb)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosticEvent {
    pub timestamp_ms: u64,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub level: BreadcrumbLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl DiagnosticEvent {
    pub fn new(timestamp_ms: u64, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            category: category.into(),
            message: message.into(),
            level: BreadcrumbLevel::Info,
            data: None,
        }
    }

    pub fn with_level(mut self, level: BreadcrumbLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Identifier of a captured error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReference {
    pub id: String,
    /// The host's error pipeline discarded this error before sending it
    #[serde(default)]
    pub dropped: bool,
}

impl ErrorReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dropped: false,
        }
    }

    pub fn dropped(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dropped: true,
        }
    }
}

/// Connectivity and lifecycle signals from the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostSignal {
    Online,
    Offline,
    Backgrounded,
    Foregrounded,
    PageClosing,
}

/// Immutable unit of delivery cut from the buffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    pub session_id: Uuid,
    pub segment_index: u32,
    pub mode: ReplayMode,
    pub replay_type: ReplayType,
    pub sample_rates: SampleRates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_start_timestamp: Option<u64>,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    #[serde(default)]
    pub recording_events: Vec<RawRecordingEvent>,
    #[serde(default)]
    pub diagnostic_events: Vec<DiagnosticEvent>,
    #[serde(default)]
    pub error_ids: Vec<String>,
    pub contains_full_checkout: bool,
}

/// Compression level (0-4)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fastest = 0,
    Fast = 1,
    #[default]
    Default = 2,
    Slow = 3,
    Slowest = 4,
}

impl CompressionLevel {
    pub fn from_u8(level: u8) -> Self {
        match level {
            0 => CompressionLevel::Fastest,
            1 => CompressionLevel::Fast,
            2 => CompressionLevel::Default,
            3 => CompressionLevel::Slow,
            _ => CompressionLevel::Slowest,
        }
    }

    pub fn to_gzip_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 6,
            CompressionLevel::Slow => 8,
            CompressionLevel::Slowest => 9,
        }
    }

    pub fn to_zstd_level(self) -> i32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 10,
            CompressionLevel::Slowest => 19,
        }
    }

    pub fn to_lz4_level(self) -> u32 {
        match self {
            CompressionLevel::Fastest => 1,
            CompressionLevel::Fast => 3,
            CompressionLevel::Default => 5,
            CompressionLevel::Slow => 9,
            CompressionLevel::Slowest => 12,
        }
    }
}

/// Compression applied to the recording payload of a segment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Gzip,
    Zstd,
    Lz4,
}

impl CompressionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
            CompressionType::Zstd => "zstd",
            CompressionType::Lz4 => "lz4",
        }
    }
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderStats {
    pub session_id: Uuid,
    pub mode: ReplayMode,
    pub next_segment_index: u32,
    pub buffered_events: usize,
    pub evicted_events: u64,
    pub queued_deliveries: usize,
    pub delivered_segments: u64,
    pub dropped_segments: u64,
}
