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

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::ensure_parent_dir;
use crate::error::ReplayResult;
use crate::session::Session;

/// Well-known file name of the live session record
pub const SESSION_FILE: &str = "session.json";

/// Persists the live session so a restart continues it
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored session. A missing or unreadable record yields `None`.
    pub fn load(&self) -> Option<Session> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read session record {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<Session>(&bytes) {
            Ok(session) => {
                debug!("Loaded session {} from {}", session.id, self.path.display());
                Some(session)
            }
            Err(e) => {
                warn!("Discarding corrupt session record {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Replace the stored record (write temp file, then rename)
    pub fn save(&self, session: &Session) -> ReplayResult<()> {
        ensure_parent_dir(&self.path)?;
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(session)?;
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Same as [`SessionStore::save`] on the async file API
    pub async fn write(&self, session: &Session) -> ReplayResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(session)?;
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Move persistence onto a task. Records are written in submission order;
    /// a backlog collapses to its newest record.
    pub fn spawn_writer(self) -> (SessionWriter, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Session>();
        let task = tokio::spawn(async move {
            while let Some(mut session) = rx.recv().await {
                while let Ok(newer) = rx.try_recv() {
                    session = newer;
                }
                if let Err(e) = self.write(&session).await {
                    warn!(
                        "Failed to persist session {} to {}: {}",
                        session.id,
                        self.path.display(),
                        e
                    );
                }
            }
            debug!("Session writer stopped");
        });
        (SessionWriter { tx }, task)
    }
}

/// Submits session records to the writer task. Dropping it ends the task
/// once the pending record is written.
#[derive(Debug)]
pub struct SessionWriter {
    tx: mpsc::UnboundedSender<Session>,
}

impl SessionWriter {
    pub fn submit(&self, session: Session) {
        if self.tx.send(session).is_err() {
            warn!("Session writer is gone, record not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ReplayMode, SampleRates};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load().is_none());

        let session = Session::new(ReplayMode::Buffering, SampleRates::new(0.0, 1.0), Utc::now());
        store.save(&session).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.mode(), ReplayMode::Buffering);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_record_is_ignored() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path());
        std::fs::write(store.path(), b"{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[tokio::test]
    async fn test_writer_keeps_newest_record() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("state"));
        let (writer, task) = store.clone().spawn_writer();

        let mut session = Session::new(ReplayMode::Continuous, SampleRates::new(1.0, 0.0), Utc::now());
        writer.submit(session.clone());
        session.assign_segment_index();
        session.assign_segment_index();
        writer.submit(session.clone());
        drop(writer);
        task.await.unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.segment_index(), 2);
    }
}
