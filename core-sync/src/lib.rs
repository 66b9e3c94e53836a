//! # Sync Engine Module
//!
//! Orchestrates synchronization between the local statement mirror and the
//! remote GRC service.
//!
//! ## Components
//!
//! - **Job State Machine** (`job`): pull/push job lifecycle with validated
//!   state transitions
//! - **Job Tracker** (`tracker`): the single source of truth for job state,
//!   keyed by job id, with cooperative cancellation
//! - **Pull Engine** (`pull`): fetch-and-merge of remote statements into the
//!   statement store
//! - **Push Engine** (`push`): write-back of locally modified statements
//! - **Sync Service** (`service`): the façade the UI/API layer consumes
//!
//! Jobs run as background tasks; callers poll the tracker for progress and
//! may subscribe to the event bus for advisory notifications. Per-item
//! remote failures accumulate as soft errors on the job and never escape an
//! engine.

pub mod config;
pub mod error;
pub mod job;
pub mod pull;
pub mod push;
pub mod service;
pub mod tracker;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use job::{
    JobKind, JobProgress, JobStatus, PullCounters, PushCounters, SoftError, SyncJob, SyncJobId,
};
pub use pull::PullEngine;
pub use push::PushEngine;
pub use service::SyncService;
pub use tracker::JobTracker;
