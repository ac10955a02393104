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

// Packages a buffer snapshot into one deliverable segment

use tracing::debug;

use crate::buffer::BufferSnapshot;
use crate::mode::CutState;
use crate::protocol::{ReplayType, Segment};
use crate::session::Session;

pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    /// Whether a cut with these inputs yields a segment at all.
    ///
    /// An empty buffer produces nothing unless a checkout is forced or error ids
    /// are waiting to be attached.
    pub fn should_emit(snapshot: &BufferSnapshot, cut: &CutState) -> bool {
        !snapshot.is_empty() || cut.force_checkout || !cut.error_ids.is_empty()
    }

    /// Build the next segment and advance the session's counter.
    ///
    /// Never fails. `cut_at_ms` bounds the segment when the snapshot is empty.
    pub fn build(
        snapshot: BufferSnapshot,
        session: &mut Session,
        cut: CutState,
        cut_at_ms: u64,
    ) -> Segment {
        let contains_full_checkout = snapshot.contains_checkout() || cut.force_checkout;
        let (start_timestamp_ms, end_timestamp_ms) =
            snapshot.time_bounds().unwrap_or((cut_at_ms, cut_at_ms));

        let BufferSnapshot {
            mut recording_events,
            mut diagnostic_events,
        } = snapshot;
        recording_events.sort_by_key(|e| e.timestamp_ms);
        diagnostic_events.sort_by_key(|e| e.timestamp_ms);

        let segment_index = session.assign_segment_index();
        let replay_start_timestamp = if segment_index == 0 {
            Some(session.started_at.timestamp_millis().max(0) as u64)
        } else {
            None
        };

        debug!(
            "Cut segment {} of session {} ({} recording, {} diagnostic, {} errors)",
            segment_index,
            session.id,
            recording_events.len(),
            diagnostic_events.len(),
            cut.error_ids.len()
        );

        Segment {
            session_id: session.id,
            segment_index,
            mode: session.mode(),
            replay_type: session.replay_type().unwrap_or(ReplayType::Session),
            sample_rates: session.sample_rates,
            replay_start_timestamp,
            start_timestamp_ms,
            end_timestamp_ms,
            recording_events,
            diagnostic_events,
            error_ids: cut.error_ids,
            contains_full_checkout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DiagnosticEvent, RawRecordingEvent, ReplayMode, SampleRates};
    use chrono::Utc;
    use serde_json::json;

    fn session() -> Session {
        Session::new(ReplayMode::Continuous, SampleRates::new(1.0, 0.0), Utc::now())
    }

    #[test]
    fn test_empty_unforced_cut_is_skipped() {
        assert!(!EnvelopeBuilder::should_emit(
            &BufferSnapshot::default(),
            &CutState::default()
        ));
    }

    #[test]
    fn test_forced_empty_cut_yields_metadata_only_segment() {
        let mut session = session();
        let cut = CutState {
            error_ids: vec![],
            force_checkout: true,
        };
        assert!(EnvelopeBuilder::should_emit(&BufferSnapshot::default(), &cut));

        let segment = EnvelopeBuilder::build(BufferSnapshot::default(), &mut session, cut, 1234);
        assert!(segment.contains_full_checkout);
        assert!(segment.recording_events.is_empty());
        assert_eq!(segment.start_timestamp_ms, 1234);
        assert_eq!(segment.end_timestamp_ms, 1234);
    }

    #[test]
    fn test_events_are_sorted_and_bounded() {
        let mut session = session();
        let snapshot = BufferSnapshot {
            recording_events: vec![
                RawRecordingEvent::incremental(30, json!(3)),
                RawRecordingEvent::incremental(10, json!(1)),
            ],
            diagnostic_events: vec![DiagnosticEvent::new(5, "console", "hi")],
        };
        let segment = EnvelopeBuilder::build(snapshot, &mut session, CutState::default(), 0);
        assert_eq!(segment.recording_events[0].timestamp_ms, 10);
        assert_eq!(segment.start_timestamp_ms, 5);
        assert_eq!(segment.end_timestamp_ms, 30);
        assert!(!segment.contains_full_checkout);
    }

    #[test]
    fn test_start_timestamp_only_on_first_segment() {
        let mut session = session();
        let first = EnvelopeBuilder::build(
            BufferSnapshot::default(),
            &mut session,
            CutState::default(),
            0,
        );
        let second = EnvelopeBuilder::build(
            BufferSnapshot::default(),
            &mut session,
            CutState::default(),
            0,
        );
        assert!(first.replay_start_timestamp.is_some());
        assert!(second.replay_start_timestamp.is_none());
        assert_eq!((first.segment_index, second.segment_index), (0, 1));
    }
}
