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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::protocol::{ReplayMode, ReplayType, SampleRates};

/// Idle and lifetime bounds of a session
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub max_session_life: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(15 * 60),
            max_session_life: Duration::from_secs(60 * 60),
        }
    }
}

/// Durable identity and counters of one recording lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    mode: ReplayMode,
    segment_index: u32,
    pub sample_rates: SampleRates,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replay_type: Option<ReplayType>,
}

impl Session {
    pub fn new(mode: ReplayMode, sample_rates: SampleRates, now: DateTime<Utc>) -> Self {
        let replay_type = match mode {
            ReplayMode::Continuous => Some(ReplayType::Session),
            ReplayMode::Buffering => Some(ReplayType::Buffer),
            ReplayMode::Off => None,
        };
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            last_activity: now,
            mode,
            segment_index: 0,
            sample_rates,
            replay_type,
        }
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    /// Only the mode controller calls this, after validating the transition
    pub(crate) fn set_mode(&mut self, mode: ReplayMode) {
        self.mode = mode;
    }

    /// Index the next cut segment will carry
    pub fn segment_index(&self) -> u32 {
        self.segment_index
    }

    /// Hand out the current index and advance the counter in one step
    pub(crate) fn assign_segment_index(&mut self) -> u32 {
        let index = self.segment_index;
        self.segment_index += 1;
        index
    }

    pub fn replay_type(&self) -> Option<ReplayType> {
        self.replay_type
    }

    pub fn is_sampled(&self) -> bool {
        self.mode != ReplayMode::Off
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, limits: &SessionLimits) -> bool {
        let idle = now.signed_duration_since(self.last_activity);
        let age = now.signed_duration_since(self.started_at);
        exceeds(idle, limits.idle_timeout) || exceeds(age, limits.max_session_life)
    }
}

fn exceeds(elapsed: chrono::Duration, limit: Duration) -> bool {
    match elapsed.to_std() {
        Ok(elapsed) => elapsed > limit,
        // negative: clock went backwards
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_segment_index_is_monotonic() {
        let mut session = Session::new(ReplayMode::Continuous, SampleRates::new(1.0, 0.0), t(0));
        assert_eq!(session.assign_segment_index(), 0);
        assert_eq!(session.assign_segment_index(), 1);
        assert_eq!(session.assign_segment_index(), 2);
        assert_eq!(session.segment_index(), 3);
    }

    #[test]
    fn test_replay_type_follows_initial_mode() {
        let session = Session::new(ReplayMode::Buffering, SampleRates::new(0.0, 1.0), t(0));
        assert_eq!(session.replay_type(), Some(ReplayType::Buffer));
        let off = Session::new(ReplayMode::Off, SampleRates::new(0.0, 0.0), t(0));
        assert_eq!(off.replay_type(), None);
        assert!(!off.is_sampled());
    }

    #[test]
    fn test_idle_expiry() {
        let limits = SessionLimits {
            idle_timeout: Duration::from_secs(60),
            max_session_life: Duration::from_secs(3600),
        };
        let mut session = Session::new(ReplayMode::Continuous, SampleRates::new(1.0, 0.0), t(0));
        assert!(!session.is_expired(t(60), &limits));
        assert!(session.is_expired(t(61), &limits));

        session.touch(t(50));
        assert!(!session.is_expired(t(100), &limits));
    }

    #[test]
    fn test_max_life_expiry_despite_activity() {
        let limits = SessionLimits {
            idle_timeout: Duration::from_secs(60),
            max_session_life: Duration::from_secs(120),
        };
        let mut session = Session::new(ReplayMode::Continuous, SampleRates::new(1.0, 0.0), t(0));
        session.touch(t(110));
        assert!(!session.is_expired(t(115), &limits));
        assert!(session.is_expired(t(121), &limits));
    }

    #[test]
    fn test_persisted_layout_uses_camel_case() {
        let session = Session::new(ReplayMode::Buffering, SampleRates::new(0.0, 1.0), t(0));
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("startedAt").is_some());
        assert_eq!(json["segmentIndex"], 0);
        assert_eq!(json["mode"], "buffering");
    }
}
