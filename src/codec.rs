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

//! Wire encoding of segments for transports
//!
//! An encoded segment has two parts:
//! - a replay event: the segment's metadata, breadcrumbs and error ids as JSON
//! - a recording: a one-line JSON header followed by the compressed JSON array
//!   of recording events
//!
//! The envelope sent over the wire is the replay event line followed by the
//! recording.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ReplayError, ReplayResult};
use crate::protocol::{
    CompressionLevel, CompressionType, DiagnosticEvent, RawRecordingEvent, ReplayMode, ReplayType,
    SampleRates, Segment,
};

/// Segment metadata sent alongside the recording payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayEvent {
    pub replay_id: Uuid,
    pub segment_id: u32,
    pub mode: ReplayMode,
    pub replay_type: ReplayType,
    pub sample_rates: SampleRates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_start_timestamp: Option<u64>,
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    pub error_ids: Vec<String>,
    pub breadcrumbs: Vec<DiagnosticEvent>,
    pub contains_full_checkout: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordingHeader {
    segment_id: u32,
    compression: CompressionType,
    count: usize,
}

/// A segment ready for a transport
#[derive(Debug, Clone)]
pub struct EncodedSegment {
    pub event: ReplayEvent,
    /// Flat metadata for header-style transports
    pub labels: BTreeMap<String, String>,
    pub compression: CompressionType,
    pub recording: Bytes,
}

impl EncodedSegment {
    pub fn session_id(&self) -> Uuid {
        self.event.replay_id
    }

    pub fn segment_index(&self) -> u32 {
        self.event.segment_id
    }

    /// Replay event JSON line followed by the recording
    pub fn to_envelope(&self) -> ReplayResult<Vec<u8>> {
        let mut out = serde_json::to_vec(&self.event)?;
        out.push(b'\n');
        out.extend_from_slice(&self.recording);
        Ok(out)
    }
}

pub struct SegmentEncoder {
    compression_type: CompressionType,
    compression_level: CompressionLevel,
    max_event_bytes: usize,
}

impl SegmentEncoder {
    pub fn new(compression_type: CompressionType, compression_level: CompressionLevel) -> Self {
        Self {
            compression_type,
            compression_level,
            max_event_bytes: usize::MAX,
        }
    }

    pub fn with_max_event_bytes(mut self, max_event_bytes: usize) -> Self {
        self.max_event_bytes = max_event_bytes;
        self
    }

    fn encode_event(&self, event: &RawRecordingEvent) -> ReplayResult<Vec<u8>> {
        let bytes = serde_json::to_vec(event)?;
        if bytes.len() > self.max_event_bytes {
            return Err(ReplayError::Encoding(format!(
                "event is {} bytes, limit is {}",
                bytes.len(),
                self.max_event_bytes
            )));
        }
        Ok(bytes)
    }

    /// Encode a segment. Recording events that fail to serialize or exceed
    /// the per-event size bound are dropped individually; the rest of the
    /// segment is kept.
    pub fn encode(&self, segment: &Segment) -> ReplayResult<EncodedSegment> {
        let events: Vec<Vec<u8>> = segment
            .recording_events
            .iter()
            .filter_map(|event| match self.encode_event(event) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(
                        "Dropping recording event at {} ms from segment {}: {}",
                        event.timestamp_ms, segment.segment_index, e
                    );
                    None
                }
            })
            .collect();

        let mut payload = Vec::with_capacity(events.iter().map(|e| e.len() + 1).sum::<usize>() + 2);
        payload.push(b'[');
        for (i, event) in events.iter().enumerate() {
            if i > 0 {
                payload.push(b',');
            }
            payload.extend_from_slice(event);
        }
        payload.push(b']');

        let uncompressed_size = payload.len();
        let compressed = self.compress(payload)?;

        debug!(
            "Encoded segment {} of session {}: {} events, {} -> {} bytes using {:?}",
            segment.segment_index,
            segment.session_id,
            events.len(),
            uncompressed_size,
            compressed.len(),
            self.compression_type
        );

        let header = RecordingHeader {
            segment_id: segment.segment_index,
            compression: self.compression_type,
            count: events.len(),
        };
        let mut recording = serde_json::to_vec(&header)?;
        recording.push(b'\n');
        recording.extend_from_slice(&compressed);

        let event = ReplayEvent {
            replay_id: segment.session_id,
            segment_id: segment.segment_index,
            mode: segment.mode,
            replay_type: segment.replay_type,
            sample_rates: segment.sample_rates,
            replay_start_timestamp: segment.replay_start_timestamp,
            start_timestamp_ms: segment.start_timestamp_ms,
            end_timestamp_ms: segment.end_timestamp_ms,
            error_ids: segment.error_ids.clone(),
            breadcrumbs: segment.diagnostic_events.clone(),
            contains_full_checkout: segment.contains_full_checkout,
        };

        Ok(EncodedSegment {
            labels: Self::labels(segment, self.compression_type),
            event,
            compression: self.compression_type,
            recording: Bytes::from(recording),
        })
    }

    fn labels(segment: &Segment, compression: CompressionType) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("session-id".to_string(), segment.session_id.to_string());
        labels.insert("segment-id".to_string(), segment.segment_index.to_string());
        labels.insert("mode".to_string(), segment.mode.to_string());
        labels.insert(
            "replay-type".to_string(),
            segment.replay_type.as_str().to_string(),
        );
        labels.insert(
            "full-checkout".to_string(),
            segment.contains_full_checkout.to_string(),
        );
        labels.insert("compression".to_string(), compression.as_str().to_string());
        labels
    }

    /// Split a recording back into its events
    pub fn decode_recording(recording: &[u8]) -> ReplayResult<Vec<serde_json::Value>> {
        let split = recording
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| ReplayError::Encoding("missing recording header".to_string()))?;
        let header: RecordingHeader = serde_json::from_slice(&recording[..split])?;
        let body = Self::decompress(header.compression, &recording[split + 1..])?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn compress(&self, data: Vec<u8>) -> ReplayResult<Vec<u8>> {
        match self.compression_type {
            CompressionType::None => Ok(data),
            CompressionType::Gzip => self.compress_gzip(&data),
            CompressionType::Zstd => zstd::encode_all(&data[..], self.compression_level.to_zstd_level())
                .map_err(|e| ReplayError::Encoding(format!("zstd compression failed: {}", e))),
            CompressionType::Lz4 => self.compress_lz4(&data),
        }
    }

    fn compress_gzip(&self, data: &[u8]) -> ReplayResult<Vec<u8>> {
        let level = flate2::Compression::new(self.compression_level.to_gzip_level());
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), level);
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn compress_lz4(&self, data: &[u8]) -> ReplayResult<Vec<u8>> {
        let mut encoder = lz4::EncoderBuilder::new()
            .level(self.compression_level.to_lz4_level())
            .build(Vec::new())?;
        encoder.write_all(data)?;
        let (compressed, result) = encoder.finish();
        result?;
        Ok(compressed)
    }

    fn decompress(compression: CompressionType, data: &[u8]) -> ReplayResult<Vec<u8>> {
        let mut out = Vec::new();
        match compression {
            CompressionType::None => out.extend_from_slice(data),
            CompressionType::Gzip => {
                flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
            }
            CompressionType::Zstd => {
                out = zstd::decode_all(data)?;
            }
            CompressionType::Lz4 => {
                lz4::Decoder::new(data)?.read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment() -> Segment {
        Segment {
            session_id: Uuid::new_v4(),
            segment_index: 2,
            mode: ReplayMode::Continuous,
            replay_type: ReplayType::Buffer,
            sample_rates: SampleRates::new(0.0, 1.0),
            replay_start_timestamp: None,
            start_timestamp_ms: 100,
            end_timestamp_ms: 200,
            recording_events: vec![
                RawRecordingEvent::checkout(100, json!({"node": "root"})),
                RawRecordingEvent::incremental(200, json!({"diff": 1})),
            ],
            diagnostic_events: vec![DiagnosticEvent::new(150, "ui.click", "button#error")],
            error_ids: vec!["abc".to_string()],
            contains_full_checkout: true,
        }
    }

    #[test]
    fn test_every_codec_decodes_back() {
        for compression in [
            CompressionType::None,
            CompressionType::Gzip,
            CompressionType::Zstd,
            CompressionType::Lz4,
        ] {
            let encoder = SegmentEncoder::new(compression, CompressionLevel::Fast);
            let encoded = encoder.encode(&segment()).unwrap();
            let events = SegmentEncoder::decode_recording(&encoded.recording).unwrap();
            assert_eq!(events.len(), 2, "codec {:?}", compression);
            assert_eq!(events[0]["kind"], "checkout");
        }
    }

    #[test]
    fn test_labels_and_event() {
        let encoder = SegmentEncoder::new(CompressionType::Gzip, CompressionLevel::Default);
        let encoded = encoder.encode(&segment()).unwrap();
        assert_eq!(encoded.labels["segment-id"], "2");
        assert_eq!(encoded.labels["replay-type"], "buffer");
        assert_eq!(encoded.labels["full-checkout"], "true");
        assert_eq!(encoded.event.error_ids, vec!["abc".to_string()]);
        assert_eq!(encoded.event.breadcrumbs.len(), 1);
    }

    #[test]
    fn test_envelope_starts_with_event_line() {
        let encoder = SegmentEncoder::new(CompressionType::None, CompressionLevel::Default);
        let encoded = encoder.encode(&segment()).unwrap();
        let envelope = encoded.to_envelope().unwrap();
        let first_line = envelope.split(|b| *b == b'\n').next().unwrap();
        let event: ReplayEvent = serde_json::from_slice(first_line).unwrap();
        assert_eq!(event.segment_id, 2);
    }

    #[test]
    fn test_oversized_event_dropped_rest_kept() {
        let mut segment = segment();
        segment.recording_events.insert(
            1,
            RawRecordingEvent::incremental(150, json!({"blob": "x".repeat(4096)})),
        );

        let encoder = SegmentEncoder::new(CompressionType::Zstd, CompressionLevel::Default)
            .with_max_event_bytes(512);
        let encoded = encoder.encode(&segment).unwrap();

        let split = encoded.recording.iter().position(|b| *b == b'\n').unwrap();
        let header: RecordingHeader = serde_json::from_slice(&encoded.recording[..split]).unwrap();
        assert_eq!(header.count, 2);

        let events = SegmentEncoder::decode_recording(&encoded.recording).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["timestamp_ms"], 100);
        assert_eq!(events[1]["timestamp_ms"], 200);
        assert_eq!(encoded.event.start_timestamp_ms, 100);
    }

    #[test]
    fn test_every_event_dropped_still_encodes() {
        let encoder = SegmentEncoder::new(CompressionType::Gzip, CompressionLevel::Fast)
            .with_max_event_bytes(8);
        let encoded = encoder.encode(&segment()).unwrap();
        let events = SegmentEncoder::decode_recording(&encoded.recording).unwrap();
        assert!(events.is_empty());
    }
}
