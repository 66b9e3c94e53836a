//! # Job Tracker
//!
//! The single source of truth for sync-job state, keyed by job id.
//!
//! ## Overview
//!
//! Engines never hold their own copy of a job: they mutate progress through
//! this API and observers poll [`JobTracker::get`] for snapshots. Terminal
//! jobs are retained for later status queries until externally purged.
//!
//! Cancellation is cooperative: [`JobTracker::request_cancel`] trips a
//! [`CancellationToken`] the running engine observes at item boundaries;
//! the job transitions to `Cancelled` only once the engine acknowledges via
//! [`JobTracker::mark_cancelled`].
//!
//! Overlap control also lives here: creating a job whose targets intersect
//! an active job of the same kind is rejected, while disjoint jobs run
//! concurrently.

use crate::job::{JobKind, JobProgress, SyncJob, SyncJobId};
use crate::{Result, SyncError};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct JobEntry {
    job: SyncJob,
    cancel_token: CancellationToken,
}

/// In-memory registry of all sync jobs.
#[derive(Default)]
pub struct JobTracker {
    jobs: RwLock<HashMap<SyncJobId, JobEntry>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a job in `Pending` state.
    ///
    /// # Errors
    ///
    /// `SyncInProgress` if any target is already claimed by an active job of
    /// the same kind. The check and the insert run under one lock, so two
    /// racing creates cannot both claim a target.
    pub async fn create(&self, kind: JobKind, targets: Vec<String>) -> Result<SyncJob> {
        let mut jobs = self.jobs.write().await;

        for entry in jobs.values() {
            if entry.job.kind != kind || !entry.job.status.is_active() {
                continue;
            }
            if let Some(taken) = entry.job.targets.iter().find(|t| targets.contains(t)) {
                return Err(SyncError::SyncInProgress {
                    target: taken.clone(),
                });
            }
        }

        let job = SyncJob::new(kind, targets);
        debug!(job_id = %job.id, kind = %kind, targets = job.targets.len(), "Created sync job");
        jobs.insert(
            job.id,
            JobEntry {
                job: job.clone(),
                cancel_token: CancellationToken::new(),
            },
        );
        Ok(job)
    }

    /// Transition a job to `Running`.
    ///
    /// # Errors
    ///
    /// `JobNotFound` for an unknown id; `InvalidStateTransition` unless the
    /// job is `Pending`.
    pub async fn begin(&self, id: SyncJobId) -> Result<SyncJob> {
        self.transition(id, SyncJob::start).await
    }

    /// Replace a running job's progress counters (last write wins).
    pub async fn update_progress(&self, id: SyncJobId, progress: JobProgress) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = Self::entry_mut(&mut jobs, id)?;
        entry.job.update_progress(progress)
    }

    /// Set or clear the "currently processing" label.
    ///
    /// A no-op on terminal jobs.
    pub async fn set_current(&self, id: SyncJobId, current: Option<String>) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = Self::entry_mut(&mut jobs, id)?;
        if !entry.job.status.is_terminal() {
            entry.job.current = current;
        }
        Ok(())
    }

    /// Append a per-item soft error to the job.
    pub async fn record_soft_error(
        &self,
        id: SyncJobId,
        target: impl Into<String> + Send,
        message: impl Into<String> + Send,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let entry = Self::entry_mut(&mut jobs, id)?;
        entry.job.push_soft_error(target, message);
        Ok(())
    }

    /// Request cooperative cancellation.
    ///
    /// Trips the job's cancellation token; a no-op when the job is already
    /// terminal. The status only becomes `Cancelled` once the engine
    /// observes the token and acknowledges.
    pub async fn request_cancel(&self, id: SyncJobId) -> Result<()> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(&id).ok_or_else(|| SyncError::JobNotFound {
            job_id: id.to_string(),
        })?;

        if entry.job.status.is_terminal() {
            return Ok(());
        }
        debug!(job_id = %id, "Cancellation requested");
        entry.cancel_token.cancel();
        Ok(())
    }

    /// The cancellation token engines watch while running the job.
    pub async fn cancel_token(&self, id: SyncJobId) -> Result<CancellationToken> {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .map(|entry| entry.cancel_token.clone())
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: id.to_string(),
            })
    }

    /// Engine acknowledgement that it observed a cancellation request.
    pub async fn mark_cancelled(&self, id: SyncJobId) -> Result<SyncJob> {
        self.transition(id, SyncJob::cancel).await
    }

    /// Finish a job: `Completed` without a fatal error, `Failed` with one.
    pub async fn complete(&self, id: SyncJobId, fatal_error: Option<String>) -> Result<SyncJob> {
        match fatal_error {
            None => self.transition(id, SyncJob::complete).await,
            Some(message) => self.transition(id, move |job| job.fail(message)).await,
        }
    }

    /// Snapshot of a job's current state.
    pub async fn get(&self, id: SyncJobId) -> Result<SyncJob> {
        let jobs = self.jobs.read().await;
        jobs.get(&id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: id.to_string(),
            })
    }

    /// All jobs, optionally filtered by kind, most recent first.
    pub async fn list(&self, kind: Option<JobKind>) -> Vec<SyncJob> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<SyncJob> = jobs
            .values()
            .filter(|entry| kind.map_or(true, |k| entry.job.kind == k))
            .map(|entry| entry.job.clone())
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    async fn transition<F>(&self, id: SyncJobId, f: F) -> Result<SyncJob>
    where
        F: FnOnce(SyncJob) -> Result<SyncJob>,
    {
        let mut jobs = self.jobs.write().await;
        let entry = Self::entry_mut(&mut jobs, id)?;
        let updated = f(entry.job.clone())?;
        entry.job = updated.clone();
        Ok(updated)
    }

    fn entry_mut(
        jobs: &mut HashMap<SyncJobId, JobEntry>,
        id: SyncJobId,
    ) -> Result<&mut JobEntry> {
        jobs.get_mut(&id).ok_or_else(|| SyncError::JobNotFound {
            job_id: id.to_string(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, PullCounters};
    use std::sync::Arc;

    fn targets(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();

        let found = tracker.get(job.id).await.unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.targets, targets(&["sys-a"]));
    }

    #[tokio::test]
    async fn test_get_unknown_job_fails() {
        let tracker = JobTracker::new();
        let err = tracker.get(SyncJobId::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_overlapping_targets_rejected() {
        let tracker = JobTracker::new();
        tracker
            .create(JobKind::Pull, targets(&["sys-a", "sys-b"]))
            .await
            .unwrap();

        let err = tracker
            .create(JobKind::Pull, targets(&["sys-b", "sys-c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncInProgress { target } if target == "sys-b"));
    }

    #[tokio::test]
    async fn test_disjoint_targets_run_concurrently() {
        let tracker = JobTracker::new();
        tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();
        assert!(tracker
            .create(JobKind::Pull, targets(&["sys-b"]))
            .await
            .is_ok());
        // Push jobs key on statement ids; no interference with pull targets
        assert!(tracker
            .create(JobKind::Push, targets(&["sys-a"]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_terminal_job_frees_targets() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();
        tracker.complete(job.id, None).await.unwrap();

        assert!(tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_begin_requires_pending() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();

        let started = tracker.begin(job.id).await.unwrap();
        assert_eq!(started.status, JobStatus::Running);

        let err = tracker.begin(job.id).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_progress_and_soft_errors() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a", "sys-b"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();

        tracker
            .update_progress(
                job.id,
                JobProgress::Pull(PullCounters {
                    systems_total: 2,
                    systems_completed: 1,
                    statements_merged: 10,
                    ..PullCounters::default()
                }),
            )
            .await
            .unwrap();
        tracker
            .record_soft_error(job.id, "sys-b", "remote unavailable")
            .await
            .unwrap();
        tracker
            .set_current(job.id, Some("sys-b".to_string()))
            .await
            .unwrap();

        let snapshot = tracker.get(job.id).await.unwrap();
        assert_eq!(snapshot.progress.items_processed(), 1);
        assert_eq!(snapshot.soft_errors.len(), 1);
        assert_eq!(snapshot.current.as_deref(), Some("sys-b"));
    }

    #[tokio::test]
    async fn test_cancellation_flow() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Push, targets(&["stmt-1"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();

        let token = tracker.cancel_token(job.id).await.unwrap();
        assert!(!token.is_cancelled());

        tracker.request_cancel(job.id).await.unwrap();
        assert!(token.is_cancelled());
        // Status flips only once the engine acknowledges
        assert_eq!(tracker.get(job.id).await.unwrap().status, JobStatus::Running);

        let cancelled = tracker.mark_cancelled(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_request_cancel_noop_on_terminal() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Push, targets(&["stmt-1"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();
        tracker.complete(job.id, None).await.unwrap();

        assert!(tracker.request_cancel(job.id).await.is_ok());
        assert_eq!(
            tracker.get(job.id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_complete_with_fatal_error_fails_job() {
        let tracker = JobTracker::new();
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();

        let failed = tracker
            .complete(job.id, Some("store unreachable".to_string()))
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("store unreachable"));
    }

    #[tokio::test]
    async fn test_list_filters_by_kind() {
        let tracker = JobTracker::new();
        tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();
        tracker
            .create(JobKind::Push, targets(&["stmt-1"]))
            .await
            .unwrap();

        assert_eq!(tracker.list(None).await.len(), 2);
        assert_eq!(tracker.list(Some(JobKind::Pull)).await.len(), 1);
        assert_eq!(tracker.list(Some(JobKind::Push)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_progress_updates_and_polls() {
        let tracker = Arc::new(JobTracker::new());
        let job = tracker
            .create(JobKind::Pull, targets(&["sys-a"]))
            .await
            .unwrap();
        tracker.begin(job.id).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20u64 {
            let tracker = Arc::clone(&tracker);
            let id = job.id;
            handles.push(tokio::spawn(async move {
                tracker
                    .update_progress(
                        id,
                        JobProgress::Pull(PullCounters {
                            systems_total: 20,
                            systems_completed: i + 1,
                            ..PullCounters::default()
                        }),
                    )
                    .await
                    .unwrap();
                // Poll from the same task; must never observe torn state
                let snapshot = tracker.get(id).await.unwrap();
                assert!(snapshot.progress.items_processed() >= 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let final_job = tracker.get(job.id).await.unwrap();
        assert!(final_job.progress.items_processed() >= 1);
        assert_eq!(final_job.status, JobStatus::Running);
    }
}
