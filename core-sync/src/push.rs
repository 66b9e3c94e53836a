//! # Push Engine
//!
//! Write-back of locally modified statements to the remote GRC service.
//!
//! ## Workflow
//!
//! 1. Claim the target statements through the job tracker (overlap-checked)
//! 2. Filter targets down to push-eligible statements (state `modified`);
//!    ineligible ones are skipped and counted neither as succeeded nor
//!    failed, unknown ids leave a soft error
//! 3. Per eligible statement: send the effective content under the
//!    collaborator's call timeout; success marks the statement pushed,
//!    failure records a soft error and the batch continues
//! 4. Cancellation is observed between statements; not-yet-attempted
//!    statements are left unchanged
//!
//! The job reaches `Completed` once every eligible statement was attempted,
//! even with `failed > 0`.

use crate::config::SyncConfig;
use crate::job::{JobKind, JobProgress, PushCounters, SyncJobId};
use crate::tracker::JobTracker;
use crate::{Result, SyncError};
use bridge_traits::audit::{AuditRecord, AuditStatus};
use bridge_traits::grc::GrcWriteSink;
use core_runtime::audit::AuditEmitter;
use core_runtime::events::{CoreEvent, EventBus, StatementEvent, SyncEvent};
use core_statements::{Statement, StatementError, StatementId, StatementStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrates push jobs against the remote write sink.
#[derive(Clone)]
pub struct PushEngine {
    config: SyncConfig,
    store: Arc<dyn StatementStore>,
    sink: Arc<dyn GrcWriteSink>,
    tracker: Arc<JobTracker>,
    event_bus: EventBus,
    audit: AuditEmitter,
}

impl PushEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn StatementStore>,
        sink: Arc<dyn GrcWriteSink>,
        tracker: Arc<JobTracker>,
        event_bus: EventBus,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            config,
            store,
            sink,
            tracker,
            event_bus,
            audit,
        }
    }

    /// Start a push over the given statements.
    ///
    /// Returns the job id immediately; the run happens in the background.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty target set
    /// - `SyncInProgress` when a target overlaps an active push
    #[instrument(skip(self), fields(statements = statement_ids.len()))]
    pub async fn start_push(&self, statement_ids: Vec<StatementId>) -> Result<SyncJobId> {
        if statement_ids.is_empty() {
            return Err(SyncError::InvalidInput {
                field: "statement_ids".to_string(),
                message: "at least one statement id is required".to_string(),
            });
        }

        let targets = statement_ids.iter().map(|id| id.as_str()).collect();
        let job = self.tracker.create(JobKind::Push, targets).await?;
        let job_id = job.id;
        let token = self.tracker.cancel_token(job_id).await?;

        let engine = self.clone();
        tokio::spawn(async move {
            let run = engine.run_push(job_id, statement_ids, token);
            let result = match timeout(
                Duration::from_secs(engine.config.job_timeout_secs),
                run,
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    engine
                        .finish_failed(
                            job_id,
                            format!(
                                "Timeout after {} seconds",
                                engine.config.job_timeout_secs
                            ),
                        )
                        .await
                }
            };

            if let Err(e) = result {
                error!(job_id = %job_id, error = %e, "Push job task failed");
            }
        });

        info!(job_id = %job_id, "Started push job");
        Ok(job_id)
    }

    /// Execute the push run for one job.
    #[instrument(skip(self, statement_ids, token), fields(job_id = %job_id))]
    async fn run_push(
        &self,
        job_id: SyncJobId,
        statement_ids: Vec<StatementId>,
        token: CancellationToken,
    ) -> Result<()> {
        self.tracker.begin(job_id).await?;

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                job_id: job_id.to_string(),
                kind: JobKind::Push.to_string(),
                targets: statement_ids.len(),
            }))
            .ok();

        let eligible = match self.filter_eligible(job_id, statement_ids).await {
            Ok(eligible) => eligible,
            Err(e) => return self.finish_failed(job_id, e.to_string()).await,
        };
        let mut counters = PushCounters {
            eligible_total: eligible.len() as u64,
            ..PushCounters::default()
        };
        self.tracker
            .update_progress(job_id, JobProgress::Push(counters))
            .await?;

        for statement in eligible {
            if token.is_cancelled() {
                return self.finish_cancelled(job_id, counters).await;
            }

            self.tracker
                .set_current(job_id, Some(statement.id.to_string()))
                .await?;

            let content = statement.effective_content().to_string();
            let call_timeout = self.sink.call_timeout();
            debug!(statement_id = %statement.id, remote_id = %statement.remote_id, "Pushing statement");

            let outcome = timeout(
                call_timeout,
                self.sink.write_statement(&statement.remote_id, &content),
            )
            .await;
            counters.attempted += 1;

            match outcome {
                Ok(Ok(())) => match self.store.mark_pushed(&statement.id, true).await {
                    Ok(_) => {
                        counters.succeeded += 1;
                        self.event_bus
                            .emit(CoreEvent::Statement(StatementEvent::Pushed {
                                statement_id: statement.id.to_string(),
                                remote_id: statement.remote_id.clone(),
                            }))
                            .ok();
                    }
                    Err(e @ StatementError::Conflict { .. }) => {
                        // The statement was resolved or reverted while the
                        // write was in flight; count it against the batch
                        // without aborting.
                        warn!(statement_id = %statement.id, error = %e, "Statement changed during push");
                        counters.failed += 1;
                        self.tracker
                            .record_soft_error(job_id, statement.id.to_string(), e.to_string())
                            .await?;
                    }
                    Err(e) => {
                        // The remote accepted the write but the local record
                        // could not be updated; the mirror is now suspect.
                        return self
                            .finish_failed(job_id, format!("statement store failure: {}", e))
                            .await;
                    }
                },
                Ok(Err(e)) => {
                    warn!(statement_id = %statement.id, error = %e, "Remote write failed");
                    if let Err(store_err) = self.store.mark_pushed(&statement.id, false).await {
                        warn!(statement_id = %statement.id, error = %store_err, "Failed to record push failure");
                    }
                    counters.failed += 1;
                    self.tracker
                        .record_soft_error(job_id, statement.id.to_string(), e.to_string())
                        .await?;
                }
                Err(_) => {
                    warn!(statement_id = %statement.id, "Remote write timed out");
                    if let Err(store_err) = self.store.mark_pushed(&statement.id, false).await {
                        warn!(statement_id = %statement.id, error = %store_err, "Failed to record push failure");
                    }
                    counters.failed += 1;
                    self.tracker
                        .record_soft_error(
                            job_id,
                            statement.id.to_string(),
                            format!(
                                "remote call timed out after {} seconds",
                                call_timeout.as_secs()
                            ),
                        )
                        .await?;
                }
            }

            self.tracker
                .update_progress(job_id, JobProgress::Push(counters))
                .await?;
            if counters.attempted % self.config.progress_event_stride == 0
                || counters.attempted == counters.eligible_total
            {
                self.event_bus
                    .emit(CoreEvent::Sync(SyncEvent::Progress {
                        job_id: job_id.to_string(),
                        items_processed: counters.attempted,
                        items_total: counters.eligible_total,
                        percent: JobProgress::Push(counters).percent(),
                        current: Some(statement.id.to_string()),
                    }))
                    .ok();
            }
        }

        self.tracker.set_current(job_id, None).await?;
        let job = self.tracker.complete(job_id, None).await?;

        info!(
            job_id = %job_id,
            attempted = counters.attempted,
            succeeded = counters.succeeded,
            failed = counters.failed,
            "Push job completed"
        );

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                job_id: job_id.to_string(),
                items_processed: counters.attempted,
                soft_errors: job.soft_errors.len() as u64,
                duration_secs: job.duration_secs().unwrap_or(0),
            }))
            .ok();
        self.audit.record(
            AuditRecord::new(
                "sync.push",
                "sync_job",
                job_id.to_string(),
                "completed",
                AuditStatus::Success,
            )
            .with_details(serde_json::json!({
                "eligible": counters.eligible_total,
                "succeeded": counters.succeeded,
                "failed": counters.failed,
            })),
        );

        Ok(())
    }

    /// Resolve targets to push-eligible statements.
    ///
    /// Ineligible statements are skipped silently; unknown ids leave a soft
    /// error. A store failure here is fatal.
    async fn filter_eligible(
        &self,
        job_id: SyncJobId,
        statement_ids: Vec<StatementId>,
    ) -> Result<Vec<Statement>> {
        let mut eligible = Vec::new();

        for id in statement_ids {
            match self.store.find_by_id(&id).await {
                Ok(Some(statement)) if statement.is_push_eligible() => eligible.push(statement),
                Ok(Some(statement)) => {
                    debug!(
                        statement_id = %id,
                        state = %statement.sync_state,
                        "Skipping push-ineligible statement"
                    );
                }
                Ok(None) => {
                    self.tracker
                        .record_soft_error(job_id, id.to_string(), "statement not found")
                        .await?;
                }
                Err(e) => {
                    return Err(SyncError::Fatal(format!(
                        "statement store failure: {}",
                        e
                    )));
                }
            }
        }

        Ok(eligible)
    }

    async fn finish_cancelled(&self, job_id: SyncJobId, counters: PushCounters) -> Result<()> {
        let job = self.tracker.mark_cancelled(job_id).await?;
        info!(job_id = %job_id, attempted = counters.attempted, "Push job cancelled");

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                job_id: job_id.to_string(),
                items_processed: counters.attempted,
            }))
            .ok();
        self.audit.record(AuditRecord::new(
            "sync.push",
            "sync_job",
            job.id.to_string(),
            "cancelled",
            AuditStatus::Info,
        ));
        Ok(())
    }

    async fn finish_failed(&self, job_id: SyncJobId, message: String) -> Result<()> {
        error!(job_id = %job_id, error = %message, "Push job failed");
        let job = self.tracker.complete(job_id, Some(message.clone())).await?;

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Failed {
                job_id: job_id.to_string(),
                message: message.clone(),
                items_processed: job.progress.items_processed(),
            }))
            .ok();
        self.audit.record(
            AuditRecord::new(
                "sync.push",
                "sync_job",
                job_id.to_string(),
                "failed",
                AuditStatus::Failure,
            )
            .with_details(serde_json::json!({ "error": message })),
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
