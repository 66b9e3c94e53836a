//! # Event Bus System
//!
//! Event-driven notifications for the sync core using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus is an advisory observation channel: polling the job tracker
//! remains the canonical way to read job state, and every event payload can
//! be reconstructed from a tracker snapshot. Subscribers that fall behind
//! receive `RecvError::Lagged` and simply miss intermediate progress events.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{EventBus, CoreEvent, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Started {
//!         job_id: "job-1".to_string(),
//!         kind: "pull".to_string(),
//!         targets: 3,
//!     }))
//!     .ok();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync-job lifecycle events
    Sync(SyncEvent),
    /// Per-statement events
    Statement(StatementEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Statement(e) => e.description(),
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted over the lifecycle of a pull or push job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Job started running.
    Started {
        /// The sync job ID.
        job_id: String,
        /// Job kind ("pull" or "push").
        kind: String,
        /// Number of targets the job was given.
        targets: usize,
    },
    /// Incremental progress update.
    Progress {
        /// The sync job ID.
        job_id: String,
        /// Units of work completed so far (systems for pull, statements for push).
        items_processed: u64,
        /// Total units of work.
        items_total: u64,
        /// Progress percentage (0-100).
        percent: u8,
        /// What the job is currently working on.
        current: Option<String>,
    },
    /// Job finished; soft errors may still be present on the job record.
    Completed {
        /// The sync job ID.
        job_id: String,
        /// Units of work completed.
        items_processed: u64,
        /// Number of per-item soft errors accumulated.
        soft_errors: u64,
        /// Duration of the job in seconds.
        duration_secs: u64,
    },
    /// Job aborted on a fatal error.
    Failed {
        /// The sync job ID.
        job_id: String,
        /// Human-readable error message.
        message: String,
        /// Units of work completed before the failure.
        items_processed: u64,
    },
    /// Job stopped after a cancellation request was observed.
    Cancelled {
        /// The sync job ID.
        job_id: String,
        /// Units of work completed before cancellation.
        items_processed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync job started",
            SyncEvent::Progress { .. } => "Sync job in progress",
            SyncEvent::Completed { .. } => "Sync job completed",
            SyncEvent::Failed { .. } => "Sync job failed",
            SyncEvent::Cancelled { .. } => "Sync job cancelled",
        }
    }
}

// ============================================================================
// Statement Events
// ============================================================================

/// Events describing state changes of individual statements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum StatementEvent {
    /// A pull found remote drift under a pending local edit.
    ConflictDetected {
        /// The statement ID.
        statement_id: String,
        /// Control the statement belongs to.
        control_ref: String,
    },
    /// An operator resolved a conflict.
    ConflictResolved {
        /// The statement ID.
        statement_id: String,
        /// Resolution choice ("keep_local", "keep_remote", "merge").
        resolution: String,
    },
    /// A local edit was written back to the remote service.
    Pushed {
        /// The statement ID.
        statement_id: String,
        /// Remote identifier the content was written to.
        remote_id: String,
    },
}

impl StatementEvent {
    fn description(&self) -> &str {
        match self {
            StatementEvent::ConflictDetected { .. } => "Conflict detected",
            StatementEvent::ConflictResolved { .. } => "Conflict resolved",
            StatementEvent::Pushed { .. } => "Statement pushed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for publishing core events.
///
/// Cheap to clone; all clones share the same underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error when there are none. Emitters treat both outcomes as fine.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive future events.
    ///
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
