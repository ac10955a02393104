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

use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

use crate::protocol::{DiagnosticEvent, RawRecordingEvent};

/// How much the buffer keeps between flushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Accept nothing
    Discard,
    /// Keep a bounded tail, evicting oldest first but never the latest checkout
    RollingTail,
    /// Keep everything until the next snapshot
    Unbounded,
}

/// One buffered item
#[derive(Debug, Clone, PartialEq)]
pub enum BufferedEvent {
    Recording(RawRecordingEvent),
    Diagnostic(DiagnosticEvent),
}

impl BufferedEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            BufferedEvent::Recording(e) => e.timestamp_ms,
            BufferedEvent::Diagnostic(e) => e.timestamp_ms,
        }
    }

    fn is_checkout(&self) -> bool {
        matches!(self, BufferedEvent::Recording(e) if e.is_checkout())
    }
}

impl From<RawRecordingEvent> for BufferedEvent {
    fn from(event: RawRecordingEvent) -> Self {
        BufferedEvent::Recording(event)
    }
}

impl From<DiagnosticEvent> for BufferedEvent {
    fn from(event: DiagnosticEvent) -> Self {
        BufferedEvent::Diagnostic(event)
    }
}

/// Contents taken out of the buffer by a snapshot, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferSnapshot {
    pub recording_events: Vec<RawRecordingEvent>,
    pub diagnostic_events: Vec<DiagnosticEvent>,
}

impl BufferSnapshot {
    pub fn is_empty(&self) -> bool {
        self.recording_events.is_empty() && self.diagnostic_events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.recording_events.len() + self.diagnostic_events.len()
    }

    pub fn contains_checkout(&self) -> bool {
        self.recording_events.iter().any(|e| e.is_checkout())
    }

    /// Earliest and latest timestamp across both event kinds
    pub fn time_bounds(&self) -> Option<(u64, u64)> {
        self.recording_events
            .iter()
            .map(|e| e.timestamp_ms)
            .chain(self.diagnostic_events.iter().map(|e| e.timestamp_ms))
            .fold(None, |bounds, ts| match bounds {
                None => Some((ts, ts)),
                Some((lo, hi)) => Some((lo.min(ts), hi.max(ts))),
            })
    }
}

/// Accumulates recording and diagnostic events between flushes
#[derive(Debug)]
pub struct RecordingBuffer {
    events: VecDeque<BufferedEvent>,
    // index into `events` of the newest checkout
    latest_checkout: Option<usize>,
    retention: Retention,

    // Rolling-tail bounds
    max_events: usize,
    max_span_ms: u64,
    newest_timestamp_ms: u64,

    // Statistics
    total_pushed: u64,
    total_evicted: u64,
}

impl RecordingBuffer {
    pub fn new(retention: Retention, max_events: usize, max_span: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            latest_checkout: None,
            retention,
            max_events: max_events.max(1),
            max_span_ms: max_span.as_millis() as u64,
            newest_timestamp_ms: 0,
            total_pushed: 0,
            total_evicted: 0,
        }
    }

    /// Switch policy. Discarding also clears what is held.
    pub fn set_retention(&mut self, retention: Retention) {
        if self.retention == retention {
            return;
        }
        debug!("Buffer retention {:?} -> {:?}", self.retention, retention);
        self.retention = retention;
        match retention {
            Retention::Discard => self.clear(),
            Retention::RollingTail => self.enforce_bounds(),
            Retention::Unbounded => {}
        }
    }

    /// Append an event. Returns false when the buffer is discarding.
    ///
    /// Out-of-order timestamps are accepted; consumers sort before use.
    pub fn push(&mut self, event: impl Into<BufferedEvent>) -> bool {
        if self.retention == Retention::Discard {
            return false;
        }

        let event = event.into();
        self.newest_timestamp_ms = self.newest_timestamp_ms.max(event.timestamp_ms());
        if event.is_checkout() {
            self.latest_checkout = Some(self.events.len());
        }
        self.events.push_back(event);
        self.total_pushed += 1;

        if self.retention == Retention::RollingTail {
            self.enforce_bounds();
        }
        true
    }

    fn enforce_bounds(&mut self) {
        while self.events.len() > self.max_events {
            match self.oldest_evictable() {
                Some(index) => self.evict(index),
                None => break,
            }
        }

        while let Some(index) = self.oldest_evictable() {
            let age = self
                .newest_timestamp_ms
                .saturating_sub(self.events[index].timestamp_ms());
            if age > self.max_span_ms {
                self.evict(index);
            } else {
                break;
            }
        }
    }

    fn oldest_evictable(&self) -> Option<usize> {
        match self.latest_checkout {
            Some(0) if self.events.len() > 1 => Some(1),
            Some(0) => None,
            _ if self.events.is_empty() => None,
            _ => Some(0),
        }
    }

    fn evict(&mut self, index: usize) {
        if let Some(event) = self.events.remove(index) {
            if let Some(checkout) = self.latest_checkout {
                if index < checkout {
                    self.latest_checkout = Some(checkout - 1);
                }
            }
            self.total_evicted += 1;
            debug!(
                "Evicted buffered event at {} ms ({} held)",
                event.timestamp_ms(),
                self.events.len()
            );
        }
    }

    /// Take the current contents and leave the buffer empty
    pub fn snapshot(&mut self) -> BufferSnapshot {
        let mut snapshot = BufferSnapshot::default();
        for event in self.events.drain(..) {
            match event {
                BufferedEvent::Recording(e) => snapshot.recording_events.push(e),
                BufferedEvent::Diagnostic(e) => snapshot.diagnostic_events.push(e),
            }
        }
        self.latest_checkout = None;
        snapshot
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.latest_checkout = None;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The checkout currently retained as replacement baseline
    pub fn latest_checkout(&self) -> Option<&RawRecordingEvent> {
        self.latest_checkout
            .and_then(|i| self.events.get(i))
            .and_then(|event| match event {
                BufferedEvent::Recording(e) => Some(e),
                BufferedEvent::Diagnostic(_) => None,
            })
    }

    /// (events held, events pushed, events evicted)
    pub fn stats(&self) -> (usize, u64, u64) {
        (self.events.len(), self.total_pushed, self.total_evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tail(max_events: usize) -> RecordingBuffer {
        RecordingBuffer::new(Retention::RollingTail, max_events, Duration::from_secs(3600))
    }

    #[test]
    fn test_checkout_index_tracks_evictions() {
        let mut buffer = tail(3);
        buffer.push(RawRecordingEvent::incremental(1, json!(1)));
        buffer.push(RawRecordingEvent::checkout(2, json!("base")));
        buffer.push(RawRecordingEvent::incremental(3, json!(3)));
        buffer.push(RawRecordingEvent::incremental(4, json!(4)));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.latest_checkout().unwrap().timestamp_ms, 2);

        buffer.push(RawRecordingEvent::incremental(5, json!(5)));
        buffer.push(RawRecordingEvent::incremental(6, json!(6)));
        let snapshot = buffer.snapshot();
        let stamps: Vec<u64> = snapshot.recording_events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![2, 5, 6]);
    }

    #[test]
    fn test_newer_checkout_releases_older_one() {
        let mut buffer = tail(2);
        buffer.push(RawRecordingEvent::checkout(1, json!("a")));
        buffer.push(RawRecordingEvent::checkout(2, json!("b")));
        buffer.push(RawRecordingEvent::incremental(3, json!(3)));

        let snapshot = buffer.snapshot();
        let stamps: Vec<u64> = snapshot.recording_events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![2, 3]);
    }

    #[test]
    fn test_time_span_bound() {
        let mut buffer = RecordingBuffer::new(Retention::RollingTail, 100, Duration::from_millis(1000));
        buffer.push(DiagnosticEvent::new(0, "ui.click", "a"));
        buffer.push(DiagnosticEvent::new(500, "ui.click", "b"));
        buffer.push(DiagnosticEvent::new(1600, "ui.click", "c"));

        let snapshot = buffer.snapshot();
        let stamps: Vec<u64> = snapshot.diagnostic_events.iter().map(|e| e.timestamp_ms).collect();
        assert_eq!(stamps, vec![1600]);
    }

    #[test]
    fn test_unbounded_never_evicts() {
        let mut buffer = RecordingBuffer::new(Retention::Unbounded, 2, Duration::from_millis(1));
        for i in 0..10 {
            buffer.push(RawRecordingEvent::incremental(i * 1000, json!(i)));
        }
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.stats().2, 0);
    }

    #[test]
    fn test_discard_rejects_and_clears() {
        let mut buffer = RecordingBuffer::new(Retention::Unbounded, 10, Duration::from_secs(60));
        buffer.push(RawRecordingEvent::incremental(1, json!(1)));
        buffer.set_retention(Retention::Discard);
        assert!(buffer.is_empty());
        assert!(!buffer.push(RawRecordingEvent::incremental(2, json!(2))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_time_bounds() {
        let snapshot = BufferSnapshot {
            recording_events: vec![RawRecordingEvent::incremental(50, json!(null))],
            diagnostic_events: vec![DiagnosticEvent::new(10, "console", "x")],
        };
        assert_eq!(snapshot.time_bounds(), Some((10, 50)));
        assert_eq!(BufferSnapshot::default().time_bounds(), None);
    }
}
