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

//! The recorder facade the host talks to.
//!
//! All mutable capture state lives in one [`ReplayCore`] behind a plain mutex.
//! Every operation on it is synchronous and short, so the lock is never held
//! across an `.await`. Two tasks run beside it: the flush driver, which sleeps
//! until the scheduler's next deadline and cuts segments, and the delivery
//! worker, which owns the outbound queue.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::{BufferedEvent, RecordingBuffer};
use crate::codec::SegmentEncoder;
use crate::config::ReplayConfig;
use crate::delivery::{DeliveryHandle, DeliveryQueue};
use crate::envelope::EnvelopeBuilder;
use crate::error::{ReplayError, ReplayResult};
use crate::mode::{retention_for, ErrorOutcome, ModeController};
use crate::persist::queue_log::QUEUE_FILE;
use crate::persist::{SessionStore, SessionWriter};
use crate::protocol::{
    DiagnosticEvent, ErrorReference, HostSignal, RawRecordingEvent, RecorderStats, ReplayMode,
    Segment,
};
use crate::sampler::Sampler;
use crate::scheduler::{FlushReason, FlushScheduler};
use crate::session::{Session, SessionLimits};
use crate::transport::Transport;

/// Synchronous capture state. Only ever touched under the recorder's mutex.
pub(crate) struct ReplayCore {
    session: Session,
    controller: ModeController,
    buffer: RecordingBuffer,
    scheduler: FlushScheduler,
    sampler: Sampler,
    store: Option<SessionStore>,
    writer: Option<SessionWriter>,
    limits: SessionLimits,
    checkout_tx: watch::Sender<u64>,
}

impl ReplayCore {
    pub(crate) fn new(config: &ReplayConfig, mut sampler: Sampler, wall: DateTime<Utc>) -> Self {
        let store = config.session.state_dir.as_ref().map(SessionStore::new);
        let limits = config.session.limits();

        let resumed = if config.session.sticky {
            store
                .as_ref()
                .and_then(|store| store.load())
                .filter(|session| !session.is_expired(wall, &limits))
        } else {
            None
        };

        let session = match resumed {
            Some(session) => {
                info!(
                    "Resuming session {} in {} mode at segment {}",
                    session.id,
                    session.mode(),
                    session.segment_index()
                );
                session
            }
            None => {
                let session = Session::new(sampler.sample(), sampler.rates(), wall);
                info!("Started session {} in {} mode", session.id, session.mode());
                session
            }
        };

        let buffer = RecordingBuffer::new(
            retention_for(session.mode()),
            config.buffer.max_buffered_events,
            config.buffer.max_duration(),
        );
        let (checkout_tx, _) = watch::channel(0);

        Self {
            session,
            controller: ModeController::new(),
            buffer,
            scheduler: FlushScheduler::new(config.flush.min_delay(), config.flush.max_delay()),
            sampler,
            store,
            writer: None,
            limits,
            checkout_tx,
        }
    }

    /// Route session persistence through a writer task from now on
    pub(crate) fn persist_in_background(&mut self) -> Option<JoinHandle<()>> {
        let store = self.store.clone()?;
        let (writer, task) = store.spawn_writer();
        self.writer = Some(writer);
        self.persist_session();
        Some(task)
    }

    /// Stop persisting. The writer task exits after its last record.
    pub(crate) fn detach_store(&mut self) {
        self.writer = None;
        self.store = None;
    }

    /// Buffer one host event. Returns the final segment of the previous
    /// session when the event arrived after that session expired.
    pub(crate) fn ingest(
        &mut self,
        event: BufferedEvent,
        wall: DateTime<Utc>,
        now: Instant,
    ) -> Option<Segment> {
        let expired = self.check_expiry(wall, now);

        // Activity keeps the session alive even when nothing is retained
        self.session.touch(wall);
        if self.buffer.push(event) && self.session.mode() == ReplayMode::Continuous {
            self.scheduler.note_activity(now);
        }
        expired
    }

    pub(crate) fn capture_error(
        &mut self,
        error: &ErrorReference,
        wall: DateTime<Utc>,
        now: Instant,
    ) -> (ErrorOutcome, Option<Segment>) {
        let outcome = self.controller.on_error(&mut self.session, error);
        match outcome {
            ErrorOutcome::Ignored => (outcome, None),
            ErrorOutcome::Attached => {
                self.scheduler.note_activity(now);
                (outcome, None)
            }
            ErrorOutcome::Upgraded => {
                self.buffer.set_retention(retention_for(self.session.mode()));
                self.checkout_tx.send_modify(|generation| *generation += 1);
                self.persist_session();
                // The buffered tail goes out right away as segment N with the checkout flag
                self.scheduler.request_forced();
                (outcome, self.cut(wall, now, FlushReason::Forced))
            }
        }
    }

    /// Roll over to a fresh session if the current one is past its limits.
    /// The old session's pending content is cut first, best effort.
    pub(crate) fn check_expiry(&mut self, wall: DateTime<Utc>, now: Instant) -> Option<Segment> {
        if !self.session.is_expired(wall, &self.limits) {
            return None;
        }
        info!("Session {} expired", self.session.id);
        self.rotate_session(wall, now)
    }

    pub(crate) fn rotate_session(&mut self, wall: DateTime<Utc>, now: Instant) -> Option<Segment> {
        let last = self.force_cut(wall, now);

        self.buffer.clear();
        self.controller = ModeController::new();
        self.scheduler.reset();
        self.session = Session::new(self.sampler.sample(), self.sampler.rates(), wall);
        self.buffer.set_retention(retention_for(self.session.mode()));

        if self.session.is_sampled() {
            self.checkout_tx.send_modify(|generation| *generation += 1);
        }
        info!(
            "Started session {} in {} mode",
            self.session.id,
            self.session.mode()
        );
        self.persist_session();
        last
    }

    /// Ask for a cut that skips the minimum delay. No-op unless continuous.
    pub(crate) fn force_cut(&mut self, wall: DateTime<Utc>, now: Instant) -> Option<Segment> {
        if self.session.mode() != ReplayMode::Continuous {
            return None;
        }
        self.scheduler.request_forced();
        self.cut(wall, now, FlushReason::Forced)
    }

    /// Cut a segment if one is due at `now`
    pub(crate) fn cut_if_due(&mut self, wall: DateTime<Utc>, now: Instant) -> Option<Segment> {
        match self.next_flush_deadline(now) {
            Some(deadline) if deadline <= now => self.cut(wall, now, FlushReason::Scheduled),
            _ => None,
        }
    }

    fn cut(&mut self, wall: DateTime<Utc>, now: Instant, reason: FlushReason) -> Option<Segment> {
        if self.session.mode() != ReplayMode::Continuous || !self.scheduler.begin_cut() {
            return None;
        }
        debug!("{:?} cut for session {}", reason, self.session.id);

        let snapshot = self.buffer.snapshot();
        let cut_state = self.controller.take_cut_state();

        if !EnvelopeBuilder::should_emit(&snapshot, &cut_state) {
            self.scheduler.finish_cut(now, false);
            return None;
        }

        let cut_at_ms = wall.timestamp_millis().max(0) as u64;
        let segment = EnvelopeBuilder::build(snapshot, &mut self.session, cut_state, cut_at_ms);
        self.scheduler.finish_cut(now, true);
        self.persist_session();
        Some(segment)
    }

    pub(crate) fn next_flush_deadline(&self, now: Instant) -> Option<Instant> {
        if self.session.mode() != ReplayMode::Continuous {
            return None;
        }
        self.scheduler.next_deadline(now)
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    fn persist_session(&self) {
        if let Some(writer) = &self.writer {
            writer.submit(self.session.clone());
        } else if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.session) {
                warn!(
                    "Failed to persist session {} to {}: {}",
                    self.session.id,
                    store.path().display(),
                    e
                );
            }
        }
    }
}

fn lock(core: &Mutex<ReplayCore>) -> MutexGuard<'_, ReplayCore> {
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Tasks {
    driver_stop: oneshot::Sender<()>,
    driver: JoinHandle<()>,
    worker: JoinHandle<()>,
    session_writer: Option<JoinHandle<()>>,
}

/// Session replay recorder
pub struct ReplayRecorder {
    core: Arc<Mutex<ReplayCore>>,
    delivery: DeliveryHandle,
    wake: Arc<Notify>,
    tasks: Mutex<Option<Tasks>>,
}

impl ReplayRecorder {
    /// Sample (or resume) a session and start the flush and delivery tasks
    pub async fn start(config: ReplayConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let sampler = Sampler::new(config.sampling.rates());
        Self::start_with_sampler(config, transport, sampler).await
    }

    pub async fn start_with_sampler(
        config: ReplayConfig,
        transport: Arc<dyn Transport>,
        sampler: Sampler,
    ) -> Result<Self> {
        transport
            .initialize()
            .await
            .with_context(|| format!("Failed to initialize {} transport", transport.transport_type()))?;

        let encoder = SegmentEncoder::new(config.delivery.compression, config.delivery.level())
            .with_max_event_bytes(config.delivery.max_event_bytes);
        let policy = config.delivery.retry_policy();
        let queue = match &config.session.state_dir {
            Some(dir) => DeliveryQueue::open(
                dir.join(QUEUE_FILE),
                policy,
                config.delivery.max_queue_size,
                encoder,
            )
            .await
            .context("Failed to open delivery log")?,
            None => DeliveryQueue::in_memory(policy, config.delivery.max_queue_size, encoder),
        };
        if !queue.is_empty() {
            info!("Restored {} undelivered segments", queue.len());
        }

        let mut core = ReplayCore::new(&config, sampler, Utc::now());
        let session_writer = core.persist_in_background();
        let core = Arc::new(Mutex::new(core));
        let (delivery, worker) = queue.spawn(transport.clone());
        let wake = Arc::new(Notify::new());
        let (driver_stop, stop_rx) = oneshot::channel();
        let driver = tokio::spawn(run_flush_driver(
            core.clone(),
            delivery.clone(),
            wake.clone(),
            stop_rx,
        ));

        info!(
            "Replay recorder started (transport: {}, flush {}..{} ms)",
            transport.transport_type(),
            config.flush.min_delay_ms,
            config.flush.max_delay_ms
        );

        Ok(Self {
            core,
            delivery,
            wake,
            tasks: Mutex::new(Some(Tasks {
                driver_stop,
                driver,
                worker,
                session_writer,
            })),
        })
    }

    pub fn add_recording_event(&self, event: RawRecordingEvent) {
        self.ingest(event.into());
    }

    pub fn add_breadcrumb(&self, event: DiagnosticEvent) {
        self.ingest(event.into());
    }

    fn ingest(&self, event: BufferedEvent) {
        let expired = lock(&self.core).ingest(event, Utc::now(), Instant::now());
        if let Some(segment) = expired {
            self.delivery.enqueue(segment);
        }
        self.wake.notify_one();
    }

    /// Report an error the host captured. Upgrades a buffering session.
    pub fn capture_error(&self, error: ErrorReference) -> ErrorOutcome {
        let (outcome, segment) = lock(&self.core).capture_error(&error, Utc::now(), Instant::now());
        if let Some(segment) = segment {
            self.delivery.enqueue(segment);
        }
        if outcome != ErrorOutcome::Ignored {
            self.wake.notify_one();
        }
        outcome
    }

    pub fn handle_signal(&self, signal: HostSignal) {
        debug!("Host signal: {:?}", signal);
        match signal {
            HostSignal::Backgrounded | HostSignal::PageClosing => {
                self.flush();
            }
            HostSignal::Foregrounded => {
                let expired = lock(&self.core).check_expiry(Utc::now(), Instant::now());
                if let Some(segment) = expired {
                    self.delivery.enqueue(segment);
                }
                self.wake.notify_one();
            }
            HostSignal::Online | HostSignal::Offline => {}
        }
        self.delivery.signal(signal);
    }

    /// Cut whatever is buffered now, ignoring the minimum delay. Returns the
    /// index of the cut segment; `None` outside continuous mode or when there
    /// was nothing to send.
    pub fn flush(&self) -> Option<u32> {
        let segment = lock(&self.core).force_cut(Utc::now(), Instant::now());
        segment.map(|segment| {
            let index = segment.segment_index;
            self.delivery.enqueue(segment);
            self.wake.notify_one();
            index
        })
    }

    /// Wait until every segment cut so far has been offered to the transport
    pub async fn drain(&self) {
        self.delivery.drain().await;
    }

    /// Final flush, then stop both tasks. Undelivered segments stay in the
    /// delivery log when a state directory is configured.
    pub async fn stop(&self) -> ReplayResult<()> {
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or(ReplayError::ShutDown)?;

        let _ = tasks.driver_stop.send(());
        if let Err(e) = tasks.driver.await {
            error!("Flush driver task failed: {}", e);
        }

        self.flush();
        self.delivery.shutdown().await;
        if let Err(e) = tasks.worker.await {
            error!("Delivery worker task failed: {}", e);
        }

        lock(&self.core).detach_store();
        if let Some(writer) = tasks.session_writer {
            if let Err(e) = writer.await {
                error!("Session writer task failed: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Replay recorder stopped: session {}, {} delivered, {} dropped, {} still queued",
            stats.session_id,
            stats.delivered_segments,
            stats.dropped_segments,
            stats.queued_deliveries
        );
        Ok(())
    }

    pub fn stats(&self) -> RecorderStats {
        let (session_id, mode, next_segment_index, buffered_events, evicted_events) = {
            let core = lock(&self.core);
            let (held, _, evicted) = core.buffer.stats();
            (
                core.session.id,
                core.session.mode(),
                core.session.segment_index(),
                held,
                evicted,
            )
        };
        let delivery = self.delivery.stats();
        RecorderStats {
            session_id,
            mode,
            next_segment_index,
            buffered_events,
            evicted_events,
            queued_deliveries: delivery.queued(),
            delivered_segments: delivery.delivered(),
            dropped_segments: delivery.dropped(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        lock(&self.core).session().id
    }

    pub fn mode(&self) -> ReplayMode {
        lock(&self.core).session().mode()
    }

    /// Bumped every time the host should take a fresh full checkout
    pub fn checkout_requests(&self) -> watch::Receiver<u64> {
        lock(&self.core).checkout_tx.subscribe()
    }
}

async fn run_flush_driver(
    core: Arc<Mutex<ReplayCore>>,
    delivery: DeliveryHandle,
    wake: Arc<Notify>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let deadline = lock(&core).next_flush_deadline(Instant::now());
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut stop => break,
            _ = wake.notified() => {}
            _ = timer => {
                let segment = lock(&core).cut_if_due(Utc::now(), Instant::now());
                if let Some(segment) = segment {
                    delivery.enqueue(segment);
                }
            }
        }
    }
    debug!("Flush driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SampleRates;
    use chrono::Duration as WallDuration;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(session_rate: f64, error_rate: f64) -> ReplayConfig {
        let mut config = ReplayConfig::default();
        config.sampling.session_sample_rate = session_rate;
        config.sampling.error_sample_rate = error_rate;
        config
    }

    fn core(config: &ReplayConfig) -> ReplayCore {
        let sampler = Sampler::with_seed(config.sampling.rates(), 7);
        ReplayCore::new(config, sampler, Utc::now())
    }

    fn checkout(ts: u64) -> BufferedEvent {
        RawRecordingEvent::checkout(ts, json!({"dom": ts})).into()
    }

    fn incremental(ts: u64) -> BufferedEvent {
        RawRecordingEvent::incremental(ts, json!({"mutation": ts})).into()
    }

    #[test]
    fn test_scheduled_cut_waits_for_deadline() {
        let config = config(1.0, 0.0);
        let mut core = core(&config);
        let wall = Utc::now();
        let start = Instant::now();

        assert!(core.ingest(checkout(1), wall, start).is_none());
        assert!(core.cut_if_due(wall, start).is_none());

        let due = core.next_flush_deadline(start).unwrap();
        assert_eq!(due, start + config.flush.min_delay());

        let segment = core.cut_if_due(wall, due).unwrap();
        assert_eq!(segment.segment_index, 0);
        assert!(segment.contains_full_checkout);
        assert!(core.next_flush_deadline(due).is_none());
    }

    #[test]
    fn test_upgrade_cuts_buffered_tail_with_error() {
        let mut core = core(&config(0.0, 1.0));
        let wall = Utc::now();
        let now = Instant::now();
        assert_eq!(core.session().mode(), ReplayMode::Buffering);

        core.ingest(checkout(10), wall, now);
        core.ingest(incremental(11), wall, now);
        assert!(core.next_flush_deadline(now).is_none());

        let checkouts = core.checkout_tx.subscribe();
        let (outcome, segment) = core.capture_error(&ErrorReference::new("err-1"), wall, now);
        assert_eq!(outcome, ErrorOutcome::Upgraded);
        assert_eq!(*checkouts.borrow(), 1);

        let segment = segment.unwrap();
        assert_eq!(segment.mode, ReplayMode::Continuous);
        assert_eq!(segment.error_ids, vec!["err-1".to_string()]);
        assert_eq!(segment.recording_events.len(), 2);
        assert!(segment.contains_full_checkout);
    }

    #[test]
    fn test_off_session_ignores_everything() {
        let mut core = core(&config(0.0, 0.0));
        let wall = Utc::now();
        let now = Instant::now();

        core.ingest(checkout(1), wall, now);
        let (outcome, segment) = core.capture_error(&ErrorReference::new("e"), wall, now);
        assert_eq!(outcome, ErrorOutcome::Ignored);
        assert!(segment.is_none());
        assert!(core.force_cut(wall, now).is_none());
        assert!(core.buffer.is_empty());
    }

    #[test]
    fn test_active_off_session_keeps_its_id() {
        let mut config = config(0.0, 0.0);
        config.session.idle_timeout_ms = 1_000;
        let wall = Utc::now();
        let mut core = ReplayCore::new(&config, Sampler::with_seed(config.sampling.rates(), 7), wall);
        let now = Instant::now();
        let first_id = core.session().id;
        assert_eq!(core.session().mode(), ReplayMode::Off);

        for step in 1..=6 {
            let at = wall + WallDuration::milliseconds(500 * step);
            assert!(core.ingest(incremental(step as u64), at, now).is_none());
            assert!(core.check_expiry(at, now).is_none());
        }
        assert_eq!(core.session().id, first_id);

        let idle = wall + WallDuration::milliseconds(3_000 + 1_500);
        core.check_expiry(idle, now);
        assert_ne!(core.session().id, first_id);
    }

    #[test]
    fn test_expired_session_flushes_then_rotates() {
        let mut config = config(1.0, 0.0);
        config.session.idle_timeout_ms = 1_000;
        let mut core = core(&config);
        let wall = Utc::now();
        let now = Instant::now();
        let first_id = core.session().id;

        core.ingest(checkout(1), wall, now);
        let later = wall + WallDuration::seconds(5);
        let last = core.ingest(incremental(2), later, now).unwrap();

        assert_eq!(last.session_id, first_id);
        assert_eq!(last.recording_events.len(), 1);
        assert_ne!(core.session().id, first_id);
        assert_eq!(core.session().segment_index(), 0);
        assert_eq!(core.buffer.len(), 1);
    }

    #[test]
    fn test_sticky_session_resumes_from_state_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = config(1.0, 0.0);
        config.session.state_dir = Some(dir.path().to_path_buf());

        let first = {
            let mut core = core(&config);
            let wall = Utc::now();
            let now = Instant::now();
            core.ingest(checkout(1), wall, now);
            core.force_cut(wall, now).unwrap();
            core.session().id
        };

        let resumed = core(&config);
        assert_eq!(resumed.session().id, first);
        assert_eq!(resumed.session().segment_index(), 1);

        config.session.sticky = false;
        let fresh = core(&config);
        assert_ne!(fresh.session().id, first);
    }

    #[test]
    fn test_min_delay_between_cuts() {
        let config = config(1.0, 0.0);
        let mut core = core(&config);
        let wall = Utc::now();
        let start = Instant::now();

        core.ingest(checkout(1), wall, start);
        core.force_cut(wall, start).unwrap();

        let soon = start + Duration::from_millis(10);
        core.ingest(incremental(2), wall, soon);
        let due = core.next_flush_deadline(soon).unwrap();
        assert!(due >= start + config.flush.min_delay());
    }

    #[test]
    fn test_rates_recorded_on_session() {
        let core = core(&config(1.0, 0.5));
        assert_eq!(core.session().sample_rates, SampleRates::new(1.0, 0.5));
    }
}
