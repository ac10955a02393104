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

//! Reliable, ordered delivery of segments.
//!
//! A [`DeliveryQueue`] is owned by a single worker task, so there is never more
//! than one send in flight and segments leave strictly in enqueue order. Failed
//! segments are written to the [`QueueLog`] and retried with exponential
//! backoff until they succeed, are rejected, or run out of attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::codec::SegmentEncoder;
use crate::error::{DeliveryError, ReplayResult};
use crate::persist::{LogRecord, QueueLog};
use crate::protocol::{HostSignal, Segment};
use crate::transport::Transport;

/// Backoff shape for failed sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts (including the first) before a segment is dropped
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure: doubles each time, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// A segment waiting for (re)delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedDelivery {
    pub segment: Segment,
    pub attempt_count: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueuedDelivery {
    pub fn new(segment: Segment) -> Self {
        Self {
            segment,
            attempt_count: 0,
            next_retry_at: None,
        }
    }
}

/// Counters shared between the worker and its handles
#[derive(Debug, Default)]
pub struct DeliveryStats {
    queued: AtomicUsize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl DeliveryStats {
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct QueueEntry {
    seq: u64,
    delivery: QueuedDelivery,
    ready_at: Instant,
}

pub struct DeliveryQueue {
    entries: VecDeque<QueueEntry>,
    log: Option<QueueLog>,
    next_seq: u64,
    policy: RetryPolicy,
    max_queue_size: usize,
    online: bool,
    encoder: SegmentEncoder,
    stats: Arc<DeliveryStats>,
}

impl DeliveryQueue {
    /// Queue without persistence
    pub fn in_memory(policy: RetryPolicy, max_queue_size: usize, encoder: SegmentEncoder) -> Self {
        Self {
            entries: VecDeque::new(),
            log: None,
            next_seq: 0,
            policy,
            max_queue_size: max_queue_size.max(1),
            online: true,
            encoder,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    /// Queue backed by an append-only log; pending entries from a previous run are restored
    pub async fn open(
        path: impl AsRef<Path>,
        policy: RetryPolicy,
        max_queue_size: usize,
        encoder: SegmentEncoder,
    ) -> ReplayResult<Self> {
        let (log, restored) = QueueLog::open(path).await?;
        let mut queue = Self::in_memory(policy, max_queue_size, encoder);
        let now = Instant::now();

        for (seq, delivery) in restored {
            queue.next_seq = queue.next_seq.max(seq + 1);
            queue.entries.push_back(QueueEntry {
                seq,
                delivery,
                ready_at: now,
            });
        }
        queue.log = Some(log);
        queue.trim_overflow().await;
        queue.sync_stats();
        Ok(queue)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn stats(&self) -> Arc<DeliveryStats> {
        self.stats.clone()
    }

    /// (session, segment index) of every queued entry, head first
    pub fn pending(&self) -> Vec<(uuid::Uuid, u32)> {
        self.entries
            .iter()
            .map(|e| (e.delivery.segment.session_id, e.delivery.segment.segment_index))
            .collect()
    }

    pub fn set_online(&mut self, online: bool) {
        if online && !self.online {
            info!(
                "Connectivity restored, draining {} queued segments",
                self.entries.len()
            );
            let now = Instant::now();
            for entry in self.entries.iter_mut() {
                entry.ready_at = now;
            }
        } else if !online && self.online {
            info!("Connectivity lost, pausing delivery");
        }
        self.online = online;
    }

    /// When the head of the queue becomes sendable
    pub fn next_wake(&self) -> Option<Instant> {
        if !self.online {
            return None;
        }
        self.entries.front().map(|e| e.ready_at)
    }

    /// Accept a new segment. Sent immediately when nothing is ahead of it,
    /// otherwise queued behind the existing entries.
    pub async fn enqueue(&mut self, segment: Segment, transport: &dyn Transport) {
        if !self.online || !self.entries.is_empty() {
            debug!(
                "Queueing segment {} behind {} pending (online: {})",
                segment.segment_index,
                self.entries.len(),
                self.online
            );
            self.push_back(QueuedDelivery::new(segment), Instant::now())
                .await;
            return;
        }

        let mut delivery = QueuedDelivery::new(segment);
        match self.attempt(&delivery.segment, transport).await {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_retryable() => {
                delivery.attempt_count = 1;
                if delivery.attempt_count >= self.policy.max_attempts {
                    self.report_exhausted(&delivery, &e);
                    return;
                }
                let delay = self.policy.backoff(1);
                delivery.next_retry_at = retry_timestamp(delay);
                warn!(
                    "Sending segment {} of session {} failed: {}. Retrying in {:?}",
                    delivery.segment.segment_index, delivery.segment.session_id, e, delay
                );
                self.push_back(delivery, Instant::now() + delay).await;
            }
            Err(e) => self.report_rejected(&delivery, &e),
        }
    }

    /// Send ready entries head-first until one fails or nothing is ready
    pub async fn drain_ready(&mut self, transport: &dyn Transport) {
        while self.online {
            let Some(head) = self.entries.front() else {
                break;
            };
            if head.ready_at > Instant::now() {
                break;
            }

            let result = self.attempt(&head.delivery.segment, transport).await;
            match result {
                Ok(()) => {
                    if let Some(entry) = self.entries.pop_front() {
                        self.persist(LogRecord::Removed { seq: entry.seq }).await;
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                        if entry.delivery.attempt_count > 0 {
                            info!(
                                "Delivered segment {} of session {} after {} retries",
                                entry.delivery.segment.segment_index,
                                entry.delivery.segment.session_id,
                                entry.delivery.attempt_count
                            );
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    let policy = self.policy;
                    let Some(entry) = self.entries.front_mut() else {
                        break;
                    };
                    entry.delivery.attempt_count += 1;
                    let attempts = entry.delivery.attempt_count;

                    if attempts >= policy.max_attempts {
                        if let Some(entry) = self.entries.pop_front() {
                            self.persist(LogRecord::Removed { seq: entry.seq }).await;
                            self.report_exhausted(&entry.delivery, &e);
                        }
                        continue;
                    }

                    let delay = policy.backoff(attempts);
                    entry.ready_at = Instant::now() + delay;
                    entry.delivery.next_retry_at = retry_timestamp(delay);
                    let record = LogRecord::Attempted {
                        seq: entry.seq,
                        attempt_count: attempts,
                        next_retry_at: entry.delivery.next_retry_at,
                    };
                    warn!(
                        "Sending segment {} of session {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        entry.delivery.segment.segment_index,
                        entry.delivery.segment.session_id,
                        attempts,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    self.persist(record).await;
                    break;
                }
                Err(e) => {
                    if let Some(entry) = self.entries.pop_front() {
                        self.persist(LogRecord::Removed { seq: entry.seq }).await;
                        self.report_rejected(&entry.delivery, &e);
                    }
                }
            }
        }
        self.sync_stats();
    }

    async fn attempt(&self, segment: &Segment, transport: &dyn Transport) -> Result<(), DeliveryError> {
        let encoded = self.encoder.encode(segment).map_err(|e| DeliveryError::Rejected {
            status: 0,
            message: format!("encoding failed: {}", e),
        })?;
        transport.send(&encoded).await
    }

    async fn push_back(&mut self, delivery: QueuedDelivery, ready_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.persist(LogRecord::Enqueued {
            seq,
            delivery: delivery.clone(),
        })
        .await;
        self.entries.push_back(QueueEntry {
            seq,
            delivery,
            ready_at,
        });
        self.trim_overflow().await;
        self.sync_stats();
    }

    // Oldest entries go first: recent context is worth more than superseded state
    async fn trim_overflow(&mut self) {
        while self.entries.len() > self.max_queue_size {
            let Some(oldest) = self.entries.pop_front() else {
                break;
            };
            self.persist(LogRecord::Removed { seq: oldest.seq }).await;
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Delivery queue full ({} entries), dropped segment {} of session {}",
                self.max_queue_size,
                oldest.delivery.segment.segment_index,
                oldest.delivery.segment.session_id
            );
        }
    }

    async fn persist(&mut self, record: LogRecord) {
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = log.append(&record).await {
                warn!("Failed to append to delivery log {}: {}", log.path().display(), e);
            }
        }
    }

    fn report_rejected(&self, delivery: &QueuedDelivery, e: &DeliveryError) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            "Segment {} of session {} rejected, dropping: {}",
            delivery.segment.segment_index, delivery.segment.session_id, e
        );
    }

    fn report_exhausted(&self, delivery: &QueuedDelivery, e: &DeliveryError) {
        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        error!(
            "Dropping segment {} of session {} after {} attempts: {}",
            delivery.segment.segment_index,
            delivery.segment.session_id,
            delivery.attempt_count,
            e
        );
    }

    fn sync_stats(&self) {
        self.stats.queued.store(self.entries.len(), Ordering::Relaxed);
    }

    /// Move the queue onto its own worker task
    pub fn spawn(self, transport: Arc<dyn Transport>) -> (DeliveryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = DeliveryHandle {
            tx,
            stats: self.stats.clone(),
        };
        let task = tokio::spawn(run_worker(self, transport, rx));
        (handle, task)
    }
}

fn retry_timestamp(delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .map(|delay| Utc::now() + delay)
}

enum DeliveryCommand {
    Enqueue(Segment),
    Signal(HostSignal),
    Drain(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap handle to the delivery worker
#[derive(Clone)]
pub struct DeliveryHandle {
    tx: mpsc::UnboundedSender<DeliveryCommand>,
    stats: Arc<DeliveryStats>,
}

impl DeliveryHandle {
    /// Hand a segment to the worker. Never blocks.
    pub fn enqueue(&self, segment: Segment) {
        let index = segment.segment_index;
        if self.tx.send(DeliveryCommand::Enqueue(segment)).is_err() {
            warn!("Delivery worker stopped, dropping segment {}", index);
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Forward a host signal. Shares the command channel with `enqueue`, so a
    /// signal takes effect exactly between the segments sent around it.
    pub fn signal(&self, signal: HostSignal) {
        if self.tx.send(DeliveryCommand::Signal(signal)).is_err() {
            debug!("Delivery worker stopped, ignoring {:?}", signal);
        }
    }

    /// Wait until the worker has handled everything sent before this call
    /// and attempted to send whatever is ready
    pub async fn drain(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(DeliveryCommand::Drain(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Final drain attempt, then stop the worker. Undelivered entries stay in the log.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(DeliveryCommand::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }
}

async fn run_worker(
    mut queue: DeliveryQueue,
    transport: Arc<dyn Transport>,
    mut rx: mpsc::UnboundedReceiver<DeliveryCommand>,
) {
    loop {
        let wake = queue.next_wake();
        let retry_timer = async move {
            match wake {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            command = rx.recv() => match command {
                Some(DeliveryCommand::Enqueue(segment)) => {
                    queue.enqueue(segment, transport.as_ref()).await;
                }
                Some(DeliveryCommand::Signal(HostSignal::Online)) => queue.set_online(true),
                Some(DeliveryCommand::Signal(HostSignal::Offline)) => queue.set_online(false),
                Some(DeliveryCommand::Signal(_)) => {}
                Some(DeliveryCommand::Drain(ack)) => {
                    queue.drain_ready(transport.as_ref()).await;
                    let _ = ack.send(());
                    continue;
                }
                Some(DeliveryCommand::Shutdown(ack)) => {
                    queue.drain_ready(transport.as_ref()).await;
                    info!(
                        "Delivery worker stopping with {} segments queued",
                        queue.len()
                    );
                    let _ = ack.send(());
                    break;
                }
                None => break,
            },
            _ = retry_timer => {}
        }

        queue.drain_ready(transport.as_ref()).await;
    }
}
