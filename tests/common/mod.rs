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

// Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use session_replay::codec::{EncodedSegment, ReplayEvent, SegmentEncoder};
use session_replay::{
    DeliveryError, RawRecordingEvent, ReplayMode, ReplayType, SampleRates, Segment, Transport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Transport that records what it was sent and fails on a script
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<DeliveryError>>,
    sent: Mutex<Vec<EncodedSegment>>,
    pub attempts: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends with a transient error
    pub fn fail_next(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..n {
            script.push_back(DeliveryError::Transient("503".to_string()));
        }
    }

    pub fn reject_next(&self) {
        self.script.lock().unwrap().push_back(DeliveryError::Rejected {
            status: 413,
            message: "payload too large".to_string(),
        });
    }

    /// Events of every segment that was accepted, in arrival order
    pub fn delivered(&self) -> Vec<ReplayEvent> {
        self.sent.lock().unwrap().iter().map(|s| s.event.clone()).collect()
    }

    /// Decoded recording payloads of every accepted segment
    pub fn recordings(&self) -> Vec<Vec<serde_json::Value>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| SegmentEncoder::decode_recording(&s.recording).unwrap())
            .collect()
    }

    pub fn delivered_indices(&self) -> Vec<u32> {
        self.delivered().iter().map(|e| e.segment_id).collect()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, segment: &EncodedSegment) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.script.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.sent.lock().unwrap().push(segment.clone());
        Ok(())
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn transport_type(&self) -> &str {
        "mock"
    }
}

pub fn segment(session_id: Uuid, index: u32) -> Segment {
    let ts = 1_000 + index as u64 * 100;
    Segment {
        session_id,
        segment_index: index,
        mode: ReplayMode::Continuous,
        replay_type: ReplayType::Session,
        sample_rates: SampleRates::new(1.0, 0.0),
        replay_start_timestamp: if index == 0 { Some(ts) } else { None },
        start_timestamp_ms: ts,
        end_timestamp_ms: ts + 50,
        recording_events: vec![RawRecordingEvent::incremental(ts, json!({ "n": index }))],
        diagnostic_events: vec![],
        error_ids: vec![],
        contains_full_checkout: false,
    }
}

pub fn checkout(ts: u64) -> RawRecordingEvent {
    RawRecordingEvent::checkout(ts, json!({ "dom": "<html></html>" }))
}

pub fn incremental(ts: u64) -> RawRecordingEvent {
    RawRecordingEvent::incremental(ts, json!({ "source": "mutation", "ts": ts }))
}
