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

use serde_json::json;
use session_replay::{DiagnosticEvent, RawRecordingEvent, RecordingBuffer, Retention};
use std::time::Duration;

fn incremental(ts: u64) -> RawRecordingEvent {
    RawRecordingEvent::incremental(ts, json!({ "ts": ts }))
}

fn rolling(max_events: usize) -> RecordingBuffer {
    RecordingBuffer::new(Retention::RollingTail, max_events, Duration::from_secs(3600))
}

#[test]
fn test_rolling_tail_keeps_newest_events() {
    let mut buffer = rolling(10);
    for ts in 0..15 {
        assert!(buffer.push(incremental(ts)));
    }

    assert_eq!(buffer.len(), 10);
    let (held, pushed, evicted) = buffer.stats();
    assert_eq!((held, pushed, evicted), (10, 15, 5));

    let snapshot = buffer.snapshot();
    let timestamps: Vec<u64> = snapshot.recording_events.iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(timestamps, (5..15u64).collect::<Vec<_>>());
    assert!(buffer.is_empty());
}

#[test]
fn test_latest_checkout_survives_eviction() {
    let mut buffer = rolling(10);
    buffer.push(RawRecordingEvent::checkout(0, json!({ "dom": "root" })));
    for ts in 1..=15 {
        buffer.push(incremental(ts));
    }

    assert_eq!(buffer.len(), 10);
    assert_eq!(buffer.latest_checkout().map(|e| e.timestamp_ms), Some(0));

    let snapshot = buffer.snapshot();
    assert!(snapshot.contains_checkout());
    let timestamps: Vec<u64> = snapshot.recording_events.iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(timestamps[0], 0);
    assert_eq!(&timestamps[1..], &(7..=15u64).collect::<Vec<_>>()[..]);
}

#[test]
fn test_time_span_evicts_old_events() {
    let mut buffer = RecordingBuffer::new(Retention::RollingTail, 1000, Duration::from_millis(60_000));
    buffer.push(incremental(0));
    buffer.push(incremental(30_000));
    buffer.push(incremental(90_000));

    let snapshot = buffer.snapshot();
    let timestamps: Vec<u64> = snapshot.recording_events.iter().map(|e| e.timestamp_ms).collect();
    assert_eq!(timestamps, vec![30_000, 90_000]);
}

#[test]
fn test_breadcrumbs_share_the_bound() {
    let mut buffer = rolling(4);
    buffer.push(incremental(1));
    buffer.push(DiagnosticEvent::new(2, "ui.click", "button#save"));
    buffer.push(incremental(3));
    buffer.push(DiagnosticEvent::new(4, "navigation", "/settings"));
    buffer.push(incremental(5));

    let snapshot = buffer.snapshot();
    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.diagnostic_events.len(), 2);
    assert_eq!(snapshot.time_bounds(), Some((2, 5)));
}

#[test]
fn test_switch_to_unbounded_keeps_tail() {
    let mut buffer = rolling(3);
    for ts in 0..5 {
        buffer.push(incremental(ts));
    }
    buffer.set_retention(Retention::Unbounded);
    for ts in 5..10 {
        buffer.push(incremental(ts));
    }
    assert_eq!(buffer.len(), 8);
}

#[test]
fn test_discard_accepts_nothing() {
    let mut buffer = RecordingBuffer::new(Retention::Discard, 10, Duration::from_secs(60));
    assert!(!buffer.push(incremental(1)));
    assert!(buffer.is_empty());
    assert!(buffer.snapshot().is_empty());
}
