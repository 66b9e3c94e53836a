//! # Sync Job State Machine
//!
//! Manages the lifecycle of pull/push jobs with validated state transitions.
//!
//! ## State Machine
//!
//! ```text
//! Pending → Running → Completed
//!     ↓         ↓
//!     └──────→ Failed
//!     └──────→ Cancelled
//! ```
//!
//! States progress strictly forward; terminal states never transition again.
//! A job that finishes with per-item soft errors still completes - only a
//! fatal error yields `Failed`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::job::{JobKind, SyncJob};
//!
//! let job = SyncJob::new(JobKind::Pull, vec!["system-a".to_string()]);
//! let mut job = job.start()?;
//! job.update_progress(JobProgress::Pull(counters))?;
//! let job = job.complete()?;
//! ```

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// ID Type
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Kind & Status
// ============================================================================

/// The direction a sync job moves content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Fetch-and-merge from the remote service into the local store
    Pull,
    /// Write-back of local edits to the remote service
    Push,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Pull => "pull",
            JobKind::Push => "push",
        }
    }
}

impl FromStr for JobKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(JobKind::Pull),
            "push" => Ok(JobKind::Push),
            _ => Err(SyncError::InvalidJobKind(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current status of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job has been created but not yet started
    Pending,
    /// Job is currently running
    Running,
    /// Job finished; soft errors may be present
    Completed,
    /// Job aborted on a fatal error
    Failed,
    /// Job was cancelled before completion
    Cancelled,
}

impl JobStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if this status represents an active state
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Get the string representation for serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for JobStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// A per-item failure that did not abort the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftError {
    /// The target the failure applies to (system id or statement id).
    pub target: String,
    /// Human-readable failure description.
    pub message: String,
}

/// Counters for a pull job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCounters {
    /// Systems the job was asked to pull.
    pub systems_total: u64,
    /// Systems attempted so far (including soft-failed ones).
    pub systems_completed: u64,
    /// Distinct controls seen across fetched systems.
    pub controls_seen: u64,
    /// Statements merged into the store.
    pub statements_merged: u64,
    /// Statements that entered conflict during this job.
    pub conflicts_detected: u64,
}

/// Counters for a push job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCounters {
    /// Statements eligible for pushing after filtering.
    pub eligible_total: u64,
    /// Statements attempted so far.
    pub attempted: u64,
    /// Successful writes.
    pub succeeded: u64,
    /// Failed writes (also recorded as soft errors).
    pub failed: u64,
}

/// Kind-specific progress counters for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobProgress {
    Pull(PullCounters),
    Push(PushCounters),
}

impl JobProgress {
    /// Units of work completed so far.
    pub fn items_processed(&self) -> u64 {
        match self {
            JobProgress::Pull(p) => p.systems_completed,
            JobProgress::Push(p) => p.attempted,
        }
    }

    /// Total units of work, once known.
    pub fn items_total(&self) -> u64 {
        match self {
            JobProgress::Pull(p) => p.systems_total,
            JobProgress::Push(p) => p.eligible_total,
        }
    }

    /// Progress percentage (0-100), capped.
    pub fn percent(&self) -> u8 {
        let total = self.items_total();
        if total == 0 {
            return 0;
        }
        ((self.items_processed() as f64 / total as f64) * 100.0).min(100.0) as u8
    }
}

// ============================================================================
// Sync Job Entity
// ============================================================================

/// A sync job with state machine semantics
///
/// Jobs are created in `Pending` and must move through valid transitions;
/// terminal states are final. The job tracker owns every instance - engines
/// mutate progress only through the tracker's API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique identifier for this job
    pub id: SyncJobId,
    /// Pull or push
    pub kind: JobKind,
    /// Target identifiers (system ids for pull, statement ids for push)
    pub targets: Vec<String>,
    /// Current status
    pub status: JobStatus,
    /// Kind-specific progress counters
    pub progress: JobProgress,
    /// What the job is currently working on
    pub current: Option<String>,
    /// Per-item failures that did not abort the job
    pub soft_errors: Vec<SoftError>,
    /// Error message if the job failed fatally
    pub error_message: Option<String>,
    /// When the job was created
    pub created_at: i64,
    /// When the job started running
    pub started_at: Option<i64>,
    /// When the job reached a terminal state
    pub completed_at: Option<i64>,
}

impl SyncJob {
    /// Create a new sync job in pending state
    pub fn new(kind: JobKind, targets: Vec<String>) -> Self {
        let progress = match kind {
            JobKind::Pull => JobProgress::Pull(PullCounters {
                systems_total: targets.len() as u64,
                ..PullCounters::default()
            }),
            JobKind::Push => JobProgress::Push(PushCounters::default()),
        };

        Self {
            id: SyncJobId::new(),
            kind,
            targets,
            status: JobStatus::Pending,
            progress,
            current: None,
            soft_errors: Vec::new(),
            error_message: None,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Start the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Pending` state
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.started_at = Some(current_timestamp());
        Ok(self)
    }

    /// Replace the progress counters (last write wins per counter set)
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state or the counter
    /// kind does not match the job kind
    pub fn update_progress(&mut self, progress: JobProgress) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "update_progress".to_string(),
                reason: "Job must be running to update progress".to_string(),
            });
        }

        match (self.kind, &progress) {
            (JobKind::Pull, JobProgress::Pull(_)) | (JobKind::Push, JobProgress::Push(_)) => {
                self.progress = progress;
                Ok(())
            }
            _ => Err(SyncError::InvalidInput {
                field: "progress".to_string(),
                message: format!("Counter kind does not match a {} job", self.kind),
            }),
        }
    }

    /// Record a per-item failure without aborting the job
    pub fn push_soft_error(&mut self, target: impl Into<String>, message: impl Into<String>) {
        self.soft_errors.push(SoftError {
            target: target.into(),
            message: message.into(),
        });
    }

    /// Mark the job as completed
    ///
    /// Soft errors accumulated along the way stay on the record; callers
    /// distinguish "completed with soft errors" from `Failed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Running` state
    pub fn complete(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.completed_at = Some(current_timestamp());
        self.current = None;
        Ok(self)
    }

    /// Mark the job as failed with a fatal error message
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already terminal
    pub fn fail(mut self, error_message: String) -> Result<Self> {
        self.validate_transition(JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(error_message);
        self.current = None;
        Ok(self)
    }

    /// Cancel the job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already terminal
    pub fn cancel(mut self) -> Result<Self> {
        self.validate_transition(JobStatus::Cancelled)?;
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(current_timestamp());
        self.current = None;
        Ok(self)
    }

    /// Get the duration of the job in seconds
    ///
    /// Returns None if the job hasn't started or completed yet
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    /// Validate a state transition
    fn validate_transition(&self, to: JobStatus) -> Result<()> {
        let valid = match (self.status, to) {
            // From Pending
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Pending, JobStatus::Failed) => true,

            // From Running
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,

            // Terminal states never transition
            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_secs() as i64
}

// ============================================================================
// Tests
// ============================================================================
