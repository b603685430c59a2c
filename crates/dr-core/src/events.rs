//! Job lifecycle event system.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring-buffer of recent events so that observers attaching late can still
//! see what happened.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::{AttemptOutcome, JobId, JobStatus};

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

// ---------------------------------------------------------------------------
// EventPayload
// ---------------------------------------------------------------------------

/// Payload describing what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    JobQueued {
        job_id: JobId,
    },
    StatusChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    EngineAttempted {
        job_id: JobId,
        engine: String,
        outcome: AttemptOutcome,
    },
    DeliveryAttempted {
        job_id: JobId,
        attempt: u32,
        status: Option<u16>,
    },
    JobRemoved {
        job_id: JobId,
        expired: bool,
    },
}

impl EventPayload {
    pub fn job_id(&self) -> &JobId {
        match self {
            EventPayload::JobQueued { job_id }
            | EventPayload::StatusChanged { job_id, .. }
            | EventPayload::EngineAttempted { job_id, .. }
            | EventPayload::DeliveryAttempted { job_id, .. }
            | EventPayload::JobRemoved { job_id, .. } => job_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A timestamped event ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl EventBus {
    /// Create a new event bus.
    ///
    /// `capacity` controls the broadcast channel buffer size (not the ring
    /// buffer, which is always [`MAX_RECENT_EVENTS`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all current subscribers and store it in the
    /// ring buffer.
    pub fn publish(&self, payload: EventPayload) {
        let event = Event::new(payload);

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// Return the `n` most recent events (newest first).
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let recent = self.recent.read();
        recent.iter().take(n).cloned().collect()
    }

    /// Status sequence a job has gone through, oldest first, as far as the
    /// ring buffer still remembers.
    pub fn status_history(&self, job_id: &JobId) -> Vec<JobStatus> {
        let recent = self.recent.read();
        let mut history = Vec::new();
        for event in recent.iter().rev() {
            match &event.payload {
                EventPayload::JobQueued { job_id: id } if id == job_id => {
                    history.push(JobStatus::Queued);
                }
                EventPayload::StatusChanged { job_id: id, to, .. } if id == job_id => {
                    history.push(*to);
                }
                _ => {}
            }
        }
        history
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
