//! Progress events and the broadcast bus that carries them.
//!
//! Progress entries live in memory only. Every change is also published on
//! an [`EventBus`] so HTTP streams (SSE) and tests can observe the sequence
//! without polling. Slow receivers that fall behind get `Lagged` and skip
//! ahead; a fresh snapshot is always available from the reporter.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{FileId, ProgressEntry};

/// A change to the progress state of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// An entry was added or changed.
    Updated {
        session_id: String,
        entry: ProgressEntry,
    },
    /// An entry was discarded (e.g. handed over to a retry).
    Removed { session_id: String, file_id: FileId },
    /// The session's entries were dropped.
    SessionEnded { session_id: String },
}

impl ProgressEvent {
    /// Dotted event name used as the SSE `event:` field.
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Updated { .. } => "progress.updated",
            ProgressEvent::Removed { .. } => "progress.removed",
            ProgressEvent::SessionEnded { .. } => "progress.session_ended",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ProgressEvent::Updated { session_id, .. }
            | ProgressEvent::Removed { session_id, .. }
            | ProgressEvent::SessionEnded { session_id } => session_id,
        }
    }
}

/// Broadcast-based bus for [`ProgressEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: ProgressEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
