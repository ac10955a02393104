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

//! Flush timing: debounce with a hard ceiling.
//!
//! The scheduler only computes deadlines. The recorder's flush driver sleeps
//! until [`FlushScheduler::next_deadline`] and then cuts through the same
//! entry point a forced flush uses.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Why a cut was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Debounce or ceiling timer fired
    Scheduled,
    /// Host lifecycle signal, manual flush, or post-upgrade checkout
    Forced,
}

#[derive(Debug)]
pub struct FlushScheduler {
    min_delay: Duration,
    max_delay: Duration,

    last_cut: Option<Instant>,
    first_pending: Option<Instant>,
    last_activity: Option<Instant>,

    forced: bool,
    in_flight: bool,
}

impl FlushScheduler {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            last_cut: None,
            first_pending: None,
            last_activity: None,
            forced: false,
            in_flight: false,
        }
    }

    /// Record that unflushed content arrived at `now`
    pub fn note_activity(&mut self, now: Instant) {
        if self.first_pending.is_none() {
            self.first_pending = Some(now);
        }
        self.last_activity = Some(now);
    }

    /// Ask for a cut that skips the minimum delay
    pub fn request_forced(&mut self) {
        self.forced = true;
    }

    pub fn has_pending(&self) -> bool {
        self.forced || self.first_pending.is_some()
    }

    /// When the next cut is due, or `None` if nothing is pending
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        if self.in_flight {
            return None;
        }
        if self.forced {
            return Some(now);
        }

        let first = self.first_pending?;
        let last = self.last_activity.unwrap_or(first);
        let debounce = last + self.min_delay;
        let ceiling = first + self.max_delay;
        let due = debounce.min(ceiling);

        Some(match self.last_cut {
            Some(cut) => due.max(cut + self.min_delay),
            None => due,
        })
    }

    /// Mark a cut as started. Returns false if one is already in flight.
    pub fn begin_cut(&mut self) -> bool {
        if self.in_flight {
            debug!("Flush already in flight, collapsing request");
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Mark the in-flight cut as finished. `produced` is false when the buffer was empty.
    pub fn finish_cut(&mut self, now: Instant, produced: bool) {
        self.in_flight = false;
        self.forced = false;
        self.first_pending = None;
        self.last_activity = None;
        if produced {
            self.last_cut = Some(now);
        }
    }

    /// Forget all timing state (new session)
    pub fn reset(&mut self) {
        self.last_cut = None;
        self.first_pending = None;
        self.last_activity = None;
        self.forced = false;
        self.in_flight = false;
    }
}
