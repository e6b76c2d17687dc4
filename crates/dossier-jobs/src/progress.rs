//! Session-local progress tracking.
//!
//! Entries are advisory UI state only. The persisted [`SourceRecord`] is the
//! ground truth; nothing here is ever read back to decide a record's status.
//!
//! Every mutation is a single read-modify-write under the write lock, so
//! interleaved ticks and completion callbacks cannot lose updates.
//!
//! [`SourceRecord`]: dossier_core::SourceRecord

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

use dossier_core::{defaults, EventBus, FileId, ProgressEntry, ProgressEvent, ProgressStatus};

/// Identifies one entry: the session it belongs to and its file id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    pub session_id: String,
    pub file_id: FileId,
}

impl ProgressKey {
    pub fn new(session_id: impl Into<String>, file_id: FileId) -> Self {
        Self {
            session_id: session_id.into(),
            file_id,
        }
    }
}

/// Stops the synthetic ticker when dropped.
#[derive(Debug)]
pub struct TickerGuard {
    handle: JoinHandle<()>,
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Clone)]
pub struct ProgressReporter {
    sessions: Arc<RwLock<HashMap<String, Vec<ProgressEntry>>>>,
    bus: EventBus,
    tick_interval: Duration,
    tick_step: u8,
    ceiling: u8,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

impl ProgressReporter {
    pub fn new(bus: EventBus) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            bus,
            tick_interval: Duration::from_millis(defaults::PROGRESS_TICK_MS),
            tick_step: defaults::PROGRESS_TICK_STEP,
            ceiling: defaults::PROGRESS_SYNTHETIC_CEILING,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Add a pending entry at 0%. An existing entry with the same id is replaced.
    pub async fn begin(&self, key: &ProgressKey, file_name: &str) -> ProgressEntry {
        let entry = ProgressEntry::new(key.file_id, file_name);
        {
            let mut sessions = self.sessions.write().await;
            let entries = sessions.entry(key.session_id.clone()).or_default();
            match entries.iter_mut().find(|e| e.file_id == key.file_id) {
                Some(existing) => *existing = entry.clone(),
                None => entries.push(entry.clone()),
            }
        }
        debug!(session_id = %key.session_id, file_id = %key.file_id, file_name, "Progress entry created");
        self.emit_updated(key, &entry);
        entry
    }

    /// Apply `f` to the entry atomically and publish the result.
    ///
    /// `f` returns `false` to signal "no change", which suppresses the event.
    async fn update<F>(&self, key: &ProgressKey, f: F) -> Option<ProgressEntry>
    where
        F: FnOnce(&mut ProgressEntry) -> bool,
    {
        let (entry, changed) = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .get_mut(&key.session_id)?
                .iter_mut()
                .find(|e| e.file_id == key.file_id)?;
            let changed = f(entry);
            (entry.clone(), changed)
        };
        if changed {
            self.emit_updated(key, &entry);
        }
        Some(entry)
    }

    fn emit_updated(&self, key: &ProgressKey, entry: &ProgressEntry) {
        self.bus.emit(ProgressEvent::Updated {
            session_id: key.session_id.clone(),
            entry: entry.clone(),
        });
    }

    /// Move to `processing` and raise progress to at least `progress`.
    /// Finished entries are left untouched.
    pub async fn advance(&self, key: &ProgressKey, progress: u8) -> Option<ProgressEntry> {
        self.update(key, |entry| {
            if entry.is_finished() {
                return false;
            }
            let next = entry.progress.max(progress.min(100));
            let changed = next != entry.progress || entry.status != ProgressStatus::Processing;
            entry.progress = next;
            entry.status = ProgressStatus::Processing;
            changed
        })
        .await
    }

    /// One synthetic tick: step toward the ceiling, never past it.
    pub async fn tick(&self, key: &ProgressKey) -> Option<ProgressEntry> {
        let step = self.tick_step;
        let ceiling = self.ceiling;
        let entry = self
            .update(key, |entry| {
                if entry.is_finished() || entry.progress >= ceiling {
                    return false;
                }
                entry.progress = entry.progress.saturating_add(step).min(ceiling);
                entry.status = ProgressStatus::Processing;
                true
            })
            .await;
        if let Some(e) = &entry {
            trace!(file_id = %key.file_id, progress = e.progress, "Progress tick");
        }
        entry
    }

    pub async fn attach_record(&self, key: &ProgressKey, record_id: Uuid) -> Option<ProgressEntry> {
        self.update(key, |entry| {
            let changed = entry.record_id != Some(record_id);
            entry.record_id = Some(record_id);
            changed
        })
        .await
    }

    /// Snap to 100% / completed.
    pub async fn complete(&self, key: &ProgressKey, record_id: Option<Uuid>) -> Option<ProgressEntry> {
        self.update(key, |entry| {
            entry.status = ProgressStatus::Completed;
            entry.progress = 100;
            entry.error = None;
            entry.retryable = None;
            if record_id.is_some() {
                entry.record_id = record_id;
            }
            true
        })
        .await
    }

    pub async fn fail(
        &self,
        key: &ProgressKey,
        error: impl Into<String>,
        retryable: bool,
        record_id: Option<Uuid>,
    ) -> Option<ProgressEntry> {
        let error = error.into();
        self.update(key, |entry| {
            if entry.status == ProgressStatus::Completed {
                return false;
            }
            entry.status = ProgressStatus::Failed;
            entry.error = Some(error);
            entry.retryable = Some(retryable);
            if record_id.is_some() {
                entry.record_id = record_id;
            }
            true
        })
        .await
    }

    /// Start advancing the entry on a timer until it finishes or the guard drops.
    pub fn start_ticker(&self, key: &ProgressKey) -> TickerGuard {
        let reporter = self.clone();
        let key = key.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(reporter.tick_interval);
            // The first tick of a tokio interval completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                match reporter.tick(&key).await {
                    Some(entry) if !entry.is_finished() => {}
                    _ => break,
                }
            }
        });
        TickerGuard { handle }
    }

    pub async fn get(&self, key: &ProgressKey) -> Option<ProgressEntry> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&key.session_id)?
            .iter()
            .find(|e| e.file_id == key.file_id)
            .cloned()
    }

    /// Entries of a session in creation order.
    pub async fn entries(&self, session_id: &str) -> Vec<ProgressEntry> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).cloned().unwrap_or_default()
    }

    /// Discard one entry.
    pub async fn remove(&self, key: &ProgressKey) -> Option<ProgressEntry> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let entries = sessions.get_mut(&key.session_id)?;
            let index = entries.iter().position(|e| e.file_id == key.file_id)?;
            entries.remove(index)
        };
        self.bus.emit(ProgressEvent::Removed {
            session_id: key.session_id.clone(),
            file_id: key.file_id,
        });
        Some(removed)
    }

    /// Drop all entries of a session.
    pub async fn end_session(&self, session_id: &str) -> usize {
        let removed = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .map(|entries| entries.len())
            .unwrap_or(0);
        self.bus.emit(ProgressEvent::SessionEnded {
            session_id: session_id.to_string(),
        });
        debug!(session_id, removed, "Progress session ended");
        removed
    }
}
