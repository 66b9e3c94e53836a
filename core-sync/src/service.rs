//! # Sync Service Façade
//!
//! The outward-facing surface the UI/API layer consumes: start and observe
//! jobs, and operate on individual statements by delegating to the store.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncService};
//!
//! let service = SyncService::new(SyncConfig::default(), store, source, sink, event_bus, audit);
//!
//! let job_id = service.start_pull(vec!["system-17".to_string()]).await?;
//! let status = service.job_status(job_id).await?;
//! println!("{}%", status.progress.percent());
//! ```

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::job::{JobKind, SyncJob, SyncJobId};
use crate::pull::PullEngine;
use crate::push::PushEngine;
use crate::tracker::JobTracker;
use bridge_traits::audit::{AuditRecord, AuditStatus};
use bridge_traits::grc::{GrcContentSource, GrcWriteSink};
use core_runtime::audit::AuditEmitter;
use core_runtime::events::{CoreEvent, EventBus, Receiver, StatementEvent};
use core_statements::{
    ConflictResolution, Statement, StatementError, StatementId, StatementStore, SyncState,
};
use std::sync::Arc;
use tracing::{info, instrument};

fn map_store_err(e: StatementError) -> SyncError {
    match e {
        StatementError::NotFound { id } => SyncError::StatementNotFound { statement_id: id },
        other => SyncError::Store(other),
    }
}

/// Entry point tying the store, tracker, and both engines together.
pub struct SyncService {
    store: Arc<dyn StatementStore>,
    tracker: Arc<JobTracker>,
    pull: PullEngine,
    push: PushEngine,
    event_bus: EventBus,
    audit: AuditEmitter,
}

impl SyncService {
    /// Wire up a service over the given store and remote collaborators.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn StatementStore>,
        source: Arc<dyn GrcContentSource>,
        sink: Arc<dyn GrcWriteSink>,
        event_bus: EventBus,
        audit: AuditEmitter,
    ) -> Self {
        let tracker = Arc::new(JobTracker::new());

        let pull = PullEngine::new(
            config.clone(),
            store.clone(),
            source,
            tracker.clone(),
            event_bus.clone(),
            audit.clone(),
        );
        let push = PushEngine::new(
            config,
            store.clone(),
            sink,
            tracker.clone(),
            event_bus.clone(),
            audit.clone(),
        );

        Self {
            store,
            tracker,
            pull,
            push,
            event_bus,
            audit,
        }
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Start a pull job over a set of systems; returns the job id.
    pub async fn start_pull(&self, system_ids: Vec<String>) -> Result<SyncJobId> {
        self.pull.start_pull(system_ids).await
    }

    /// Start a push job over a set of statements; returns the job id.
    pub async fn start_push(&self, statement_ids: Vec<StatementId>) -> Result<SyncJobId> {
        self.push.start_push(statement_ids).await
    }

    /// Snapshot of a job, including progress and soft errors.
    pub async fn job_status(&self, job_id: SyncJobId) -> Result<SyncJob> {
        self.tracker.get(job_id).await
    }

    /// Request cooperative cancellation of a running job.
    pub async fn cancel_job(&self, job_id: SyncJobId) -> Result<()> {
        self.tracker.request_cancel(job_id).await
    }

    /// Job history, optionally filtered by kind, most recent first.
    pub async fn list_jobs(&self, kind: Option<JobKind>) -> Vec<SyncJob> {
        self.tracker.list(kind).await
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Fetch one statement.
    pub async fn get_statement(&self, id: &StatementId) -> Result<Statement> {
        self.store
            .find_by_id(id)
            .await
            .map_err(map_store_err)?
            .ok_or_else(|| SyncError::StatementNotFound {
                statement_id: id.to_string(),
            })
    }

    /// All statements tracked for a system.
    pub async fn list_statements(&self, system_id: &str) -> Result<Vec<Statement>> {
        self.store
            .list_by_system(system_id)
            .await
            .map_err(map_store_err)
    }

    /// All statements awaiting conflict resolution.
    pub async fn list_conflicts(&self) -> Result<Vec<Statement>> {
        self.store
            .list_by_state(SyncState::Conflict)
            .await
            .map_err(map_store_err)
    }

    /// Record a local edit against a statement.
    #[instrument(skip(self, content), fields(statement_id = %id))]
    pub async fn edit_statement(
        &self,
        id: &StatementId,
        content: &str,
        editor: &str,
    ) -> Result<Statement> {
        self.store
            .record_local_edit(id, content, editor)
            .await
            .map_err(map_store_err)
    }

    /// Resolve a conflicted statement.
    #[instrument(skip(self, merged_content), fields(statement_id = %id, resolution = %resolution))]
    pub async fn resolve_statement(
        &self,
        id: &StatementId,
        resolution: ConflictResolution,
        merged_content: Option<String>,
        resolved_by: &str,
    ) -> Result<Statement> {
        let statement = self
            .store
            .apply_resolution(id, resolution, merged_content, resolved_by)
            .await
            .map_err(map_store_err)?;

        info!(resolved_by = %resolved_by, "Conflict resolved");
        self.event_bus
            .emit(CoreEvent::Statement(StatementEvent::ConflictResolved {
                statement_id: id.to_string(),
                resolution: resolution.to_string(),
            }))
            .ok();
        self.audit.record(AuditRecord::new(
            "statement.resolve",
            "statement",
            id.to_string(),
            resolution.as_str(),
            AuditStatus::Success,
        ));

        Ok(statement)
    }

    /// Discard a pending local edit.
    pub async fn revert_statement(&self, id: &StatementId) -> Result<Statement> {
        self.store
            .revert_local_edit(id)
            .await
            .map_err(map_store_err)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Subscribe to core events (advisory; polling `job_status` is the
    /// canonical observation mechanism).
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
