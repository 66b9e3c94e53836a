//! # Pull Engine
//!
//! Fetch-and-merge from the remote GRC service into the statement store.
//!
//! ## Workflow
//!
//! 1. Claim the target systems through the job tracker (overlap-checked)
//! 2. Spawn the background run, bounded by the job timeout
//! 3. Per system, in caller order: fetch its control statements under the
//!    collaborator's call timeout, merge each one through
//!    `upsert_from_remote`, then update progress
//! 4. A fetch failure for one system is a soft error; the run continues
//!    with the next system. A store failure is fatal and fails the job.
//! 5. Cancellation is observed between systems; statements already merged
//!    stay merged.
//!
//! On normal completion the job is `Completed` even when soft errors
//! accumulated - callers inspect the job snapshot to tell the difference.

use crate::config::SyncConfig;
use crate::job::{JobKind, JobProgress, PullCounters, SyncJobId};
use crate::tracker::JobTracker;
use crate::{Result, SyncError};
use bridge_traits::audit::{AuditRecord, AuditStatus};
use bridge_traits::grc::GrcContentSource;
use core_runtime::audit::AuditEmitter;
use core_runtime::events::{CoreEvent, EventBus, StatementEvent, SyncEvent};
use core_statements::{RemoteVersion, StatementStore, SyncState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Orchestrates pull jobs against the statement store.
#[derive(Clone)]
pub struct PullEngine {
    config: SyncConfig,
    store: Arc<dyn StatementStore>,
    source: Arc<dyn GrcContentSource>,
    tracker: Arc<JobTracker>,
    event_bus: EventBus,
    audit: AuditEmitter,
}

impl PullEngine {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn StatementStore>,
        source: Arc<dyn GrcContentSource>,
        tracker: Arc<JobTracker>,
        event_bus: EventBus,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            config,
            store,
            source,
            tracker,
            event_bus,
            audit,
        }
    }

    /// Start a pull over the given systems, in the given order.
    ///
    /// Returns the job id immediately; the run happens in the background.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty target set
    /// - `SyncInProgress` when a target overlaps an active pull
    #[instrument(skip(self), fields(systems = system_ids.len()))]
    pub async fn start_pull(&self, system_ids: Vec<String>) -> Result<SyncJobId> {
        if system_ids.is_empty() {
            return Err(SyncError::InvalidInput {
                field: "system_ids".to_string(),
                message: "at least one system id is required".to_string(),
            });
        }

        let job = self.tracker.create(JobKind::Pull, system_ids).await?;
        let job_id = job.id;
        let token = self.tracker.cancel_token(job_id).await?;

        let engine = self.clone();
        tokio::spawn(async move {
            let run = engine.run_pull(job_id, token);
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
                error!(job_id = %job_id, error = %e, "Pull job task failed");
            }
        });

        info!(job_id = %job_id, "Started pull job");
        Ok(job_id)
    }

    /// Execute the pull run for one job.
    #[instrument(skip(self, token), fields(job_id = %job_id))]
    async fn run_pull(&self, job_id: SyncJobId, token: CancellationToken) -> Result<()> {
        let job = self.tracker.begin(job_id).await?;
        let systems = job.targets.clone();

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                job_id: job_id.to_string(),
                kind: JobKind::Pull.to_string(),
                targets: systems.len(),
            }))
            .ok();

        let mut counters = PullCounters {
            systems_total: systems.len() as u64,
            ..PullCounters::default()
        };

        for system_id in systems {
            if token.is_cancelled() {
                return self.finish_cancelled(job_id, counters).await;
            }

            self.tracker
                .set_current(job_id, Some(system_id.clone()))
                .await?;
            debug!(system_id = %system_id, "Fetching control statements");

            let call_timeout = self.source.call_timeout();
            match timeout(
                call_timeout,
                self.source.list_control_statements(&system_id),
            )
            .await
            {
                Err(_) => {
                    warn!(system_id = %system_id, "Remote fetch timed out");
                    self.tracker
                        .record_soft_error(
                            job_id,
                            system_id.clone(),
                            format!(
                                "remote call timed out after {} seconds",
                                call_timeout.as_secs()
                            ),
                        )
                        .await?;
                }
                Ok(Err(e)) => {
                    warn!(system_id = %system_id, error = %e, "Remote fetch failed");
                    self.tracker
                        .record_soft_error(job_id, system_id.clone(), e.to_string())
                        .await?;
                }
                Ok(Ok(remote_statements)) => {
                    let mut controls = HashSet::new();
                    for remote in remote_statements {
                        let incoming = RemoteVersion {
                            control_ref: remote.control_ref.clone(),
                            remote_id: remote.statement_ref,
                            kind: remote.kind,
                            content: remote.content,
                            remote_updated_at: remote.remote_updated_at,
                        };

                        match self.store.upsert_from_remote(&system_id, incoming).await {
                            Ok(statement) => {
                                controls.insert(remote.control_ref);
                                counters.statements_merged += 1;
                                if statement.sync_state == SyncState::Conflict {
                                    counters.conflicts_detected += 1;
                                    self.event_bus
                                        .emit(CoreEvent::Statement(
                                            StatementEvent::ConflictDetected {
                                                statement_id: statement.id.to_string(),
                                                control_ref: statement.control_ref.clone(),
                                            },
                                        ))
                                        .ok();
                                }
                            }
                            Err(e) => {
                                // A local store failure means nothing further
                                // can merge; abort the whole run.
                                return self
                                    .finish_failed(
                                        job_id,
                                        format!("statement store failure: {}", e),
                                    )
                                    .await;
                            }
                        }
                    }
                    counters.controls_seen += controls.len() as u64;
                }
            }

            counters.systems_completed += 1;
            self.tracker
                .update_progress(job_id, JobProgress::Pull(counters))
                .await?;
            self.event_bus
                .emit(CoreEvent::Sync(SyncEvent::Progress {
                    job_id: job_id.to_string(),
                    items_processed: counters.systems_completed,
                    items_total: counters.systems_total,
                    percent: JobProgress::Pull(counters).percent(),
                    current: Some(system_id),
                }))
                .ok();
        }

        self.tracker.set_current(job_id, None).await?;
        let job = self.tracker.complete(job_id, None).await?;

        info!(
            job_id = %job_id,
            systems = counters.systems_completed,
            statements = counters.statements_merged,
            conflicts = counters.conflicts_detected,
            soft_errors = job.soft_errors.len(),
            "Pull job completed"
        );

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                job_id: job_id.to_string(),
                items_processed: counters.systems_completed,
                soft_errors: job.soft_errors.len() as u64,
                duration_secs: job.duration_secs().unwrap_or(0),
            }))
            .ok();
        self.audit.record(
            AuditRecord::new(
                "sync.pull",
                "sync_job",
                job_id.to_string(),
                "completed",
                AuditStatus::Success,
            )
            .with_details(serde_json::json!({
                "systems_completed": counters.systems_completed,
                "statements_merged": counters.statements_merged,
                "conflicts_detected": counters.conflicts_detected,
                "soft_errors": job.soft_errors.len(),
            })),
        );

        Ok(())
    }

    async fn finish_cancelled(&self, job_id: SyncJobId, counters: PullCounters) -> Result<()> {
        let job = self.tracker.mark_cancelled(job_id).await?;
        info!(job_id = %job_id, systems = counters.systems_completed, "Pull job cancelled");

        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Cancelled {
                job_id: job_id.to_string(),
                items_processed: counters.systems_completed,
            }))
            .ok();
        self.audit.record(AuditRecord::new(
            "sync.pull",
            "sync_job",
            job.id.to_string(),
            "cancelled",
            AuditStatus::Info,
        ));
        Ok(())
    }

    async fn finish_failed(&self, job_id: SyncJobId, message: String) -> Result<()> {
        error!(job_id = %job_id, error = %message, "Pull job failed");
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
                "sync.pull",
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use async_trait::async_trait;
    use bridge_traits::error::BridgeError;
    use bridge_traits::grc::RemoteStatement;
    use core_statements::db::create_test_pool;
    use core_statements::SqliteStatementStore;
    use std::collections::HashMap;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::{sleep, Duration};

    fn remote(control: &str, statement_ref: &str, content: &str, ts: i64) -> RemoteStatement {
        RemoteStatement {
            control_ref: control.to_string(),
            statement_ref: statement_ref.to_string(),
            kind: "implementation".to_string(),
            content: content.to_string(),
            remote_updated_at: ts,
        }
    }

    /// Fixed in-memory content source; systems in `fail` are unavailable.
    struct MapSource {
        systems: HashMap<String, Vec<RemoteStatement>>,
        fail: Vec<String>,
    }

    #[async_trait]
    impl GrcContentSource for MapSource {
        async fn list_control_statements(
            &self,
            system_id: &str,
        ) -> bridge_traits::error::Result<Vec<RemoteStatement>> {
            if self.fail.iter().any(|s| s == system_id) {
                return Err(BridgeError::Unavailable(format!(
                    "{} is unreachable",
                    system_id
                )));
            }
            self.systems
                .get(system_id)
                .cloned()
                .ok_or_else(|| BridgeError::NotFound(system_id.to_string()))
        }
    }

    /// Source that announces each call and waits for the test to release it.
    struct GatedSource {
        systems: HashMap<String, Vec<RemoteStatement>>,
        entered: mpsc::UnboundedSender<String>,
        proceed: Arc<Notify>,
    }

    #[async_trait]
    impl GrcContentSource for GatedSource {
        async fn list_control_statements(
            &self,
            system_id: &str,
        ) -> bridge_traits::error::Result<Vec<RemoteStatement>> {
            self.entered.send(system_id.to_string()).ok();
            self.proceed.notified().await;
            Ok(self.systems.get(system_id).cloned().unwrap_or_default())
        }
    }

    async fn test_engine(
        source: Arc<dyn GrcContentSource>,
    ) -> (PullEngine, Arc<SqliteStatementStore>, Arc<JobTracker>) {
        let store = Arc::new(SqliteStatementStore::new(create_test_pool().await.unwrap()));
        let tracker = Arc::new(JobTracker::new());
        let engine = PullEngine::new(
            SyncConfig::default(),
            store.clone(),
            source,
            tracker.clone(),
            EventBus::new(64),
            AuditEmitter::disabled(),
        );
        (engine, store, tracker)
    }

    async fn wait_terminal(tracker: &JobTracker, job_id: SyncJobId) -> crate::SyncJob {
        for _ in 0..400 {
            let job = tracker.get(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("job never reached a terminal state");
    }

    #[tokio::test]
    async fn test_pull_merges_all_systems() {
        let source = Arc::new(MapSource {
            systems: HashMap::from([
                (
                    "sys-a".to_string(),
                    vec![
                        remote("AC-2", "r-1", "A", 100),
                        remote("AC-2", "r-2", "B", 100),
                        remote("AU-12", "r-3", "C", 100),
                    ],
                ),
                ("sys-b".to_string(), vec![remote("CM-6", "r-4", "D", 100)]),
            ]),
            fail: vec![],
        });
        let (engine, store, tracker) = test_engine(source).await;

        let job_id = engine
            .start_pull(vec!["sys-a".to_string(), "sys-b".to_string()])
            .await
            .unwrap();
        let job = wait_terminal(&tracker, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.soft_errors.is_empty());
        match job.progress {
            JobProgress::Pull(p) => {
                assert_eq!(p.systems_completed, 2);
                assert_eq!(p.statements_merged, 4);
                assert_eq!(p.controls_seen, 3);
                assert_eq!(p.conflicts_detected, 0);
            }
            _ => panic!("Expected pull counters"),
        }

        assert_eq!(store.list_by_system("sys-a").await.unwrap().len(), 3);
        assert_eq!(store.list_by_system("sys-b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_system_failure_is_soft() {
        let source = Arc::new(MapSource {
            systems: HashMap::from([
                ("sys-a".to_string(), vec![remote("AC-2", "r-1", "A", 100)]),
                ("sys-c".to_string(), vec![remote("CM-6", "r-9", "Z", 100)]),
            ]),
            fail: vec!["sys-b".to_string()],
        });
        let (engine, store, tracker) = test_engine(source).await;

        let job_id = engine
            .start_pull(vec![
                "sys-a".to_string(),
                "sys-b".to_string(),
                "sys-c".to_string(),
            ])
            .await
            .unwrap();
        let job = wait_terminal(&tracker, job_id).await;

        // Completed, not failed: the bad system is a soft error
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.soft_errors.len(), 1);
        assert_eq!(job.soft_errors[0].target, "sys-b");

        match job.progress {
            JobProgress::Pull(p) => {
                assert_eq!(p.systems_completed, 3);
                assert_eq!(p.statements_merged, 2);
            }
            _ => panic!("Expected pull counters"),
        }
        assert_eq!(store.list_by_system("sys-c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pull_detects_conflicts_and_emits_event() {
        let source = Arc::new(MapSource {
            systems: HashMap::from([(
                "sys-a".to_string(),
                vec![remote("AC-2", "r-1", "C", 200)],
            )]),
            fail: vec![],
        });
        let (engine, store, tracker) = test_engine(source.clone()).await;
        let mut events = engine.event_bus.subscribe();

        // Seed: pulled at 100, then locally edited
        let statement = store
            .upsert_from_remote(
                "sys-a",
                RemoteVersion {
                    control_ref: "AC-2".to_string(),
                    remote_id: "r-1".to_string(),
                    kind: "implementation".to_string(),
                    content: "A".to_string(),
                    remote_updated_at: 100,
                },
            )
            .await
            .unwrap();
        store
            .record_local_edit(&statement.id, "B", "analyst")
            .await
            .unwrap();

        let job_id = engine.start_pull(vec!["sys-a".to_string()]).await.unwrap();
        let job = wait_terminal(&tracker, job_id).await;

        assert_eq!(job.status, JobStatus::Completed);
        match job.progress {
            JobProgress::Pull(p) => assert_eq!(p.conflicts_detected, 1),
            _ => panic!("Expected pull counters"),
        }

        let after = store.find_by_id(&statement.id).await.unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::Conflict);
        assert_eq!(after.local_content.as_deref(), Some("B"));
        assert_eq!(after.remote_content, "C");

        // A ConflictDetected event was broadcast during the run
        let mut saw_conflict = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                CoreEvent::Statement(StatementEvent::ConflictDetected { .. })
            ) {
                saw_conflict = true;
            }
        }
        assert!(saw_conflict);
    }

    #[tokio::test]
    async fn test_pull_cancellation_between_systems() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            systems: HashMap::from([
                ("sys-a".to_string(), vec![remote("AC-2", "r-1", "A", 100)]),
                ("sys-b".to_string(), vec![remote("CM-6", "r-2", "B", 100)]),
                ("sys-c".to_string(), vec![remote("SC-7", "r-3", "C", 100)]),
            ]),
            entered: entered_tx,
            proceed: proceed.clone(),
        });
        let (engine, store, tracker) = test_engine(source).await;

        let job_id = engine
            .start_pull(vec![
                "sys-a".to_string(),
                "sys-b".to_string(),
                "sys-c".to_string(),
            ])
            .await
            .unwrap();

        // Wait until the engine is inside the first fetch, then request
        // cancellation and let the fetch finish.
        let first = entered_rx.recv().await.unwrap();
        assert_eq!(first, "sys-a");
        tracker.request_cancel(job_id).await.unwrap();
        proceed.notify_one();

        let job = wait_terminal(&tracker, job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);

        // Exactly one system's statements were merged; the rest untouched
        match job.progress {
            JobProgress::Pull(p) => {
                assert_eq!(p.systems_completed, 1);
                assert_eq!(p.statements_merged, 1);
            }
            _ => panic!("Expected pull counters"),
        }
        assert_eq!(store.list_by_system("sys-a").await.unwrap().len(), 1);
        assert!(store.list_by_system("sys-b").await.unwrap().is_empty());
        assert!(store.list_by_system("sys-c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_pull_rejects_empty_targets() {
        let source = Arc::new(MapSource {
            systems: HashMap::new(),
            fail: vec![],
        });
        let (engine, _, _) = test_engine(source).await;

        let err = engine.start_pull(vec![]).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_start_pull_rejects_overlapping_job() {
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let proceed = Arc::new(Notify::new());
        let source = Arc::new(GatedSource {
            systems: HashMap::from([("sys-a".to_string(), vec![])]),
            entered: entered_tx,
            proceed: proceed.clone(),
        });
        let (engine, _, tracker) = test_engine(source).await;

        let job_id = engine.start_pull(vec!["sys-a".to_string()]).await.unwrap();
        entered_rx.recv().await.unwrap();

        // Same system while the first job is mid-flight
        let err = engine
            .start_pull(vec!["sys-a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SyncInProgress { .. }));

        proceed.notify_one();
        wait_terminal(&tracker, job_id).await;
    }
}
