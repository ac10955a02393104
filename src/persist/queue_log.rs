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

//! Append-only log of undelivered segments.
//!
//! Lifecycle: [`QueueLog::open`] replays the file into the live entry list,
//! rewrites it compacted, and from then on only appends. Entries are never
//! rewritten in place; acknowledgement is an explicit `removed` record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::delivery::QueuedDelivery;
use crate::error::ReplayResult;

/// Well-known file name of the delivery log
pub const QUEUE_FILE: &str = "queue.jsonl";

/// One line of the log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    Enqueued {
        seq: u64,
        delivery: QueuedDelivery,
    },
    Attempted {
        seq: u64,
        attempt_count: u32,
        #[serde(default)]
        next_retry_at: Option<DateTime<Utc>>,
    },
    Removed {
        seq: u64,
    },
}

#[derive(Debug)]
pub struct QueueLog {
    path: PathBuf,
    file: File,
}

impl QueueLog {
    /// Open (or create) the log and return the entries still pending, in enqueue order
    pub async fn open(path: impl AsRef<Path>) -> ReplayResult<(Self, Vec<(u64, QueuedDelivery)>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let entries = Self::replay(&path).await?;
        Self::compact(&path, &entries).await?;

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        if !entries.is_empty() {
            info!(
                "Recovered {} undelivered segments from {}",
                entries.len(),
                path.display()
            );
        }

        Ok((Self { path, file }, entries))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&mut self, record: &LogRecord) -> ReplayResult<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;
        self.file.flush().await?;
        Ok(())
    }

    async fn replay(path: &Path) -> ReplayResult<Vec<(u64, QueuedDelivery)>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let last = lines.len().saturating_sub(1);
        let mut live: BTreeMap<u64, QueuedDelivery> = BTreeMap::new();

        for (i, line) in lines.iter().enumerate() {
            let record = match serde_json::from_str::<LogRecord>(line) {
                Ok(record) => record,
                Err(e) if i == last => {
                    warn!("Truncating torn tail of {}: {}", path.display(), e);
                    break;
                }
                Err(e) => {
                    warn!("Skipping corrupt record {} of {}: {}", i, path.display(), e);
                    continue;
                }
            };

            match record {
                LogRecord::Enqueued { seq, delivery } => {
                    live.insert(seq, delivery);
                }
                LogRecord::Attempted {
                    seq,
                    attempt_count,
                    next_retry_at,
                } => {
                    if let Some(delivery) = live.get_mut(&seq) {
                        delivery.attempt_count = attempt_count;
                        delivery.next_retry_at = next_retry_at;
                    }
                }
                LogRecord::Removed { seq } => {
                    live.remove(&seq);
                }
            }
        }

        debug!("Replayed {} records from {}", lines.len(), path.display());
        Ok(live.into_iter().collect())
    }

    async fn compact(path: &Path, entries: &[(u64, QueuedDelivery)]) -> ReplayResult<()> {
        let tmp_path = path.with_extension("tmp");
        let mut out = Vec::new();
        for (seq, delivery) in entries {
            let record = LogRecord::Enqueued {
                seq: *seq,
                delivery: delivery.clone(),
            };
            serde_json::to_writer(&mut out, &record)?;
            out.push(b'\n');
        }
        fs::write(&tmp_path, out).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}
