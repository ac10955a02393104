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

// Mode state machine: off / buffering / continuous

use tracing::{debug, info};

use crate::buffer::Retention;
use crate::error::{ReplayError, ReplayResult};
use crate::protocol::{ErrorReference, ReplayMode};
use crate::session::Session;

/// Validate a mode change. The only legal edge is `buffering -> continuous`.
pub fn transition(from: ReplayMode, to: ReplayMode) -> ReplayResult<ReplayMode> {
    match (from, to) {
        (ReplayMode::Buffering, ReplayMode::Continuous) => Ok(to),
        _ => Err(ReplayError::IllegalTransition { from, to }),
    }
}

/// Buffer policy for a mode
pub fn retention_for(mode: ReplayMode) -> Retention {
    match mode {
        ReplayMode::Off => Retention::Discard,
        ReplayMode::Buffering => Retention::RollingTail,
        ReplayMode::Continuous => Retention::Unbounded,
    }
}

/// What a captured error did to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Session off or error dropped upstream
    Ignored,
    /// Already continuous; the id rides on the next segment
    Attached,
    /// Fired the `buffering -> continuous` transition
    Upgraded,
}

/// Per-cut state handed to the envelope builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CutState {
    pub error_ids: Vec<String>,
    pub force_checkout: bool,
}

/// Governs a session's mode. The only component that changes `Session::mode`.
#[derive(Debug, Default)]
pub struct ModeController {
    pending_error_ids: Vec<String>,
    force_checkout: bool,
}

impl ModeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_error(&mut self, session: &mut Session, error: &ErrorReference) -> ErrorOutcome {
        if error.dropped {
            debug!("Ignoring dropped error '{}'", error.id);
            return ErrorOutcome::Ignored;
        }

        match session.mode() {
            ReplayMode::Off => ErrorOutcome::Ignored,
            ReplayMode::Buffering => match transition(ReplayMode::Buffering, ReplayMode::Continuous) {
                Ok(next) => {
                    session.set_mode(next);
                    self.force_checkout = true;
                    self.attach(&error.id);
                    info!(
                        "Session {} switched from buffering to continuous on error '{}'",
                        session.id, error.id
                    );
                    ErrorOutcome::Upgraded
                }
                Err(e) => {
                    debug!("{}", e);
                    ErrorOutcome::Ignored
                }
            },
            ReplayMode::Continuous => {
                self.attach(&error.id);
                ErrorOutcome::Attached
            }
        }
    }

    fn attach(&mut self, id: &str) {
        if !self.pending_error_ids.iter().any(|existing| existing == id) {
            self.pending_error_ids.push(id.to_string());
        }
    }

    /// Whether the next cut must be marked as carrying a full checkout
    pub fn checkout_pending(&self) -> bool {
        self.force_checkout
    }

    pub fn has_pending_errors(&self) -> bool {
        !self.pending_error_ids.is_empty()
    }

    /// Take everything the next segment owns; resets the controller's per-cut state
    pub fn take_cut_state(&mut self) -> CutState {
        CutState {
            error_ids: std::mem::take(&mut self.pending_error_ids),
            force_checkout: std::mem::replace(&mut self.force_checkout, false),
        }
    }
}
