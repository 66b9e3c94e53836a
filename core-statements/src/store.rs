//! # Statement Store
//!
//! SQLite-backed persistence for tracked statements, with the merge policy
//! from `resolver` applied on every pull-side upsert.
//!
//! ## Concurrency
//!
//! Every mutating operation serializes per statement through a keyed async
//! lock (key: `system_id::remote_id`), so a concurrent `upsert_from_remote`
//! and `record_local_edit` on the same record never interleave partially.
//! The read-modify-write runs entirely under the key's guard; last committed
//! write wins and the merge-policy invariants hold as if applied atomically.

use crate::error::{Result, StatementError};
use crate::models::{ConflictResolution, Statement, StatementId, SyncState};
use crate::resolver::{classify_remote_merge, plan_resolution, MergeOutcome, ResolutionPlan};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument};

/// One remote version of a statement, as delivered by a pull.
#[derive(Debug, Clone)]
pub struct RemoteVersion {
    /// Control the statement is attached to.
    pub control_ref: String,
    /// Remote system's identifier for this statement.
    pub remote_id: String,
    /// Statement type label.
    pub kind: String,
    /// Remote content body.
    pub content: String,
    /// Remote last-modified stamp, epoch seconds.
    pub remote_updated_at: i64,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Data-access contract for tracked statements.
///
/// Pure data layer: no network I/O happens behind any of these calls.
#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Merge one remote version into the mirror.
    ///
    /// Creates the record (`new`) if absent; otherwise runs the merge
    /// policy: unmodified records take the remote value (`synced`), records
    /// with a pending edit either stay untouched (remote unchanged) or flip
    /// to `conflict` (remote moved), preserving the local edit verbatim.
    async fn upsert_from_remote(
        &self,
        system_id: &str,
        incoming: RemoteVersion,
    ) -> Result<Statement>;

    /// Record a local edit.
    ///
    /// Sets local content and `is_modified`, stamps `modified_at`. State
    /// becomes `modified`, except an existing `conflict` stays `conflict`:
    /// editing during a conflict does not silently clear it.
    async fn record_local_edit(
        &self,
        id: &StatementId,
        content: &str,
        editor: &str,
    ) -> Result<Statement>;

    /// Apply an operator's conflict resolution.
    ///
    /// # Errors
    ///
    /// `NotInConflict` unless the statement is currently conflicted;
    /// `InvalidInput` for a `merge` without non-empty content.
    async fn apply_resolution(
        &self,
        id: &StatementId,
        resolution: ConflictResolution,
        merged_content: Option<String>,
        resolved_by: &str,
    ) -> Result<Statement>;

    /// Record the outcome of a push attempt.
    ///
    /// On success the pushed value becomes the remote value, the local edit
    /// is cleared, state goes `synced`, and `last_push_at` is stamped. On
    /// failure the record is returned unchanged.
    async fn mark_pushed(&self, id: &StatementId, succeeded: bool) -> Result<Statement>;

    /// Discard a pending local edit (`modified` → `synced`).
    ///
    /// # Errors
    ///
    /// `InvalidState` for a conflicted statement: a conflict must go through
    /// `apply_resolution`.
    async fn revert_local_edit(&self, id: &StatementId) -> Result<Statement>;

    /// Find a statement by its local ID.
    async fn find_by_id(&self, id: &StatementId) -> Result<Option<Statement>>;

    /// Find a statement by its remote identity.
    async fn find_by_remote_id(
        &self,
        system_id: &str,
        remote_id: &str,
    ) -> Result<Option<Statement>>;

    /// All statements for a system, ordered by control then remote id.
    async fn list_by_system(&self, system_id: &str) -> Result<Vec<Statement>>;

    /// All statements currently in the given state.
    async fn list_by_state(&self, state: SyncState) -> Result<Vec<Statement>>;
}

// ============================================================================
// Keyed Locks
// ============================================================================

/// Registry of per-statement async locks.
///
/// Grows with the tracked statement set; entries are never reclaimed, which
/// is bounded by the mirror size.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

fn lock_key(system_id: &str, remote_id: &str) -> String {
    format!("{}::{}", system_id, remote_id)
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`StatementStore`].
pub struct SqliteStatementStore {
    pool: SqlitePool,
    locks: KeyedLocks,
}

impl SqliteStatementStore {
    /// Create a new store over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: KeyedLocks::default(),
        }
    }

    /// Fetch a statement by ID, erroring when absent.
    async fn fetch_required(&self, id: &StatementId) -> Result<Statement> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StatementError::NotFound { id: id.to_string() })
    }

    /// Acquire the per-statement lock for an existing record.
    ///
    /// The key derives from the remote identity, which never changes, so an
    /// unlocked pre-read is safe for key discovery; the caller must re-read
    /// under the guard before mutating.
    async fn lock_existing(&self, id: &StatementId) -> Result<OwnedMutexGuard<()>> {
        let statement = self.fetch_required(id).await?;
        Ok(self
            .locks
            .acquire(&lock_key(&statement.system_id, &statement.remote_id))
            .await)
    }
}

/// Database row representation of a statement
#[derive(Debug, FromRow)]
struct StatementRow {
    id: String,
    system_id: String,
    control_ref: String,
    remote_id: String,
    kind: String,
    remote_content: String,
    local_content: Option<String>,
    is_modified: i64,
    sync_state: String,
    remote_updated_at: Option<i64>,
    modified_at: Option<i64>,
    modified_by: Option<String>,
    last_pull_at: Option<i64>,
    last_push_at: Option<i64>,
    conflict_resolved_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<StatementRow> for Statement {
    type Error = StatementError;

    fn try_from(row: StatementRow) -> Result<Self> {
        Ok(Statement {
            id: StatementId::from_string(&row.id)?,
            system_id: row.system_id,
            control_ref: row.control_ref,
            remote_id: row.remote_id,
            kind: row.kind,
            remote_content: row.remote_content,
            local_content: row.local_content,
            is_modified: row.is_modified != 0,
            sync_state: SyncState::from_str(&row.sync_state)?,
            remote_updated_at: row.remote_updated_at,
            modified_at: row.modified_at,
            modified_by: row.modified_by,
            last_pull_at: row.last_pull_at,
            last_push_at: row.last_push_at,
            conflict_resolved_at: row.conflict_resolved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const STATEMENT_COLUMNS: &str = "id, system_id, control_ref, remote_id, kind, \
     remote_content, local_content, is_modified, sync_state, \
     remote_updated_at, modified_at, modified_by, \
     last_pull_at, last_push_at, conflict_resolved_at, \
     created_at, updated_at";

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl StatementStore for SqliteStatementStore {
    #[instrument(skip(self, incoming), fields(system_id = %system_id, remote_id = %incoming.remote_id))]
    async fn upsert_from_remote(
        &self,
        system_id: &str,
        incoming: RemoteVersion,
    ) -> Result<Statement> {
        let _guard = self
            .locks
            .acquire(&lock_key(system_id, &incoming.remote_id))
            .await;

        let existing = self.find_by_remote_id(system_id, &incoming.remote_id).await?;
        let now = now_timestamp();

        match classify_remote_merge(existing.as_ref(), incoming.remote_updated_at) {
            MergeOutcome::Created => {
                let id = StatementId::new();
                sqlx::query(
                    r#"
                    INSERT INTO statements (
                        id, system_id, control_ref, remote_id, kind,
                        remote_content, local_content, is_modified, sync_state,
                        remote_updated_at, last_pull_at, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, NULL, 0, 'new', ?, ?, ?, ?)
                    "#,
                )
                .bind(id.as_str())
                .bind(system_id)
                .bind(&incoming.control_ref)
                .bind(&incoming.remote_id)
                .bind(&incoming.kind)
                .bind(&incoming.content)
                .bind(incoming.remote_updated_at)
                .bind(now)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;

                debug!(statement_id = %id, "Created statement from remote");
                self.fetch_required(&id).await
            }
            MergeOutcome::RemoteRefreshed => {
                let statement = existing.expect("refresh requires an existing record");
                sqlx::query(
                    r#"
                    UPDATE statements SET
                        control_ref = ?,
                        kind = ?,
                        remote_content = ?,
                        sync_state = 'synced',
                        remote_updated_at = ?,
                        last_pull_at = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&incoming.control_ref)
                .bind(&incoming.kind)
                .bind(&incoming.content)
                .bind(incoming.remote_updated_at)
                .bind(now)
                .bind(now)
                .bind(statement.id.as_str())
                .execute(&self.pool)
                .await?;

                self.fetch_required(&statement.id).await
            }
            MergeOutcome::RemoteUnchanged => {
                let statement = existing.expect("no-op requires an existing record");
                sqlx::query(
                    "UPDATE statements SET last_pull_at = ?, updated_at = ? WHERE id = ?",
                )
                .bind(now)
                .bind(now)
                .bind(statement.id.as_str())
                .execute(&self.pool)
                .await?;

                self.fetch_required(&statement.id).await
            }
            MergeOutcome::ConflictDetected => {
                let statement = existing.expect("conflict requires an existing record");
                // The local edit is preserved verbatim for the resolver
                sqlx::query(
                    r#"
                    UPDATE statements SET
                        remote_content = ?,
                        sync_state = 'conflict',
                        remote_updated_at = ?,
                        last_pull_at = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&incoming.content)
                .bind(incoming.remote_updated_at)
                .bind(now)
                .bind(now)
                .bind(statement.id.as_str())
                .execute(&self.pool)
                .await?;

                info!(
                    statement_id = %statement.id,
                    control_ref = %statement.control_ref,
                    "Remote drift under pending local edit; statement conflicted"
                );
                self.fetch_required(&statement.id).await
            }
        }
    }

    #[instrument(skip(self, content), fields(statement_id = %id))]
    async fn record_local_edit(
        &self,
        id: &StatementId,
        content: &str,
        editor: &str,
    ) -> Result<Statement> {
        let _guard = self.lock_existing(id).await?;
        let statement = self.fetch_required(id).await?;

        // An edit during conflict does not silently clear the conflict
        let next_state = match statement.sync_state {
            SyncState::Conflict => SyncState::Conflict,
            _ => SyncState::Modified,
        };
        let now = now_timestamp();

        sqlx::query(
            r#"
            UPDATE statements SET
                local_content = ?,
                is_modified = 1,
                sync_state = ?,
                modified_at = ?,
                modified_by = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(content)
        .bind(next_state.as_str())
        .bind(now)
        .bind(editor)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        debug!(editor = %editor, state = %next_state, "Recorded local edit");
        self.fetch_required(id).await
    }

    #[instrument(skip(self, merged_content), fields(statement_id = %id, resolution = %resolution))]
    async fn apply_resolution(
        &self,
        id: &StatementId,
        resolution: ConflictResolution,
        merged_content: Option<String>,
        resolved_by: &str,
    ) -> Result<Statement> {
        let _guard = self.lock_existing(id).await?;
        let statement = self.fetch_required(id).await?;

        let plan = plan_resolution(&statement, resolution, merged_content.as_deref())?;
        let now = now_timestamp();

        match plan {
            ResolutionPlan::KeepLocal => {
                sqlx::query(
                    r#"
                    UPDATE statements SET
                        sync_state = 'modified',
                        conflict_resolved_at = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
            }
            ResolutionPlan::KeepRemote => {
                sqlx::query(
                    r#"
                    UPDATE statements SET
                        local_content = NULL,
                        is_modified = 0,
                        sync_state = 'synced',
                        conflict_resolved_at = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
            }
            ResolutionPlan::Merge { content } => {
                sqlx::query(
                    r#"
                    UPDATE statements SET
                        local_content = ?,
                        is_modified = 1,
                        sync_state = 'modified',
                        conflict_resolved_at = ?,
                        modified_at = ?,
                        modified_by = ?,
                        updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&content)
                .bind(now)
                .bind(now)
                .bind(resolved_by)
                .bind(now)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
            }
        }

        info!(resolved_by = %resolved_by, "Applied conflict resolution");
        self.fetch_required(id).await
    }

    #[instrument(skip(self), fields(statement_id = %id))]
    async fn mark_pushed(&self, id: &StatementId, succeeded: bool) -> Result<Statement> {
        let _guard = self.lock_existing(id).await?;
        let statement = self.fetch_required(id).await?;

        if !succeeded {
            // Failed pushes leave the record exactly as it was; the engine
            // records the error on the job.
            return Ok(statement);
        }

        // The record may have been resolved or reverted while the write was
        // in flight; refusing here keeps the mirror honest.
        if !statement.is_push_eligible() {
            return Err(StatementError::Conflict {
                id: id.to_string(),
                message: format!(
                    "no longer push-eligible (state {})",
                    statement.sync_state
                ),
            });
        }

        let pushed_content = statement.effective_content().to_string();
        let now = now_timestamp();

        sqlx::query(
            r#"
            UPDATE statements SET
                remote_content = ?,
                local_content = NULL,
                is_modified = 0,
                sync_state = 'synced',
                last_push_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&pushed_content)
        .bind(now)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        debug!("Marked statement pushed");
        self.fetch_required(id).await
    }

    #[instrument(skip(self), fields(statement_id = %id))]
    async fn revert_local_edit(&self, id: &StatementId) -> Result<Statement> {
        let _guard = self.lock_existing(id).await?;
        let statement = self.fetch_required(id).await?;

        if statement.sync_state == SyncState::Conflict {
            return Err(StatementError::InvalidState {
                id: id.to_string(),
                state: statement.sync_state.to_string(),
                operation: "revert".to_string(),
            });
        }

        if !statement.is_modified {
            return Ok(statement);
        }

        let now = now_timestamp();
        sqlx::query(
            r#"
            UPDATE statements SET
                local_content = NULL,
                is_modified = 0,
                sync_state = 'synced',
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        self.fetch_required(id).await
    }

    async fn find_by_id(&self, id: &StatementId) -> Result<Option<Statement>> {
        let row = sqlx::query_as::<_, StatementRow>(&format!(
            "SELECT {} FROM statements WHERE id = ?",
            STATEMENT_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Statement::try_from).transpose()
    }

    async fn find_by_remote_id(
        &self,
        system_id: &str,
        remote_id: &str,
    ) -> Result<Option<Statement>> {
        let row = sqlx::query_as::<_, StatementRow>(&format!(
            "SELECT {} FROM statements WHERE system_id = ? AND remote_id = ?",
            STATEMENT_COLUMNS
        ))
        .bind(system_id)
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Statement::try_from).transpose()
    }

    async fn list_by_system(&self, system_id: &str) -> Result<Vec<Statement>> {
        let rows = sqlx::query_as::<_, StatementRow>(&format!(
            "SELECT {} FROM statements WHERE system_id = ? ORDER BY control_ref, remote_id",
            STATEMENT_COLUMNS
        ))
        .bind(system_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Statement::try_from).collect()
    }

    async fn list_by_state(&self, state: SyncState) -> Result<Vec<Statement>> {
        let rows = sqlx::query_as::<_, StatementRow>(&format!(
            "SELECT {} FROM statements WHERE sync_state = ? ORDER BY system_id, control_ref",
            STATEMENT_COLUMNS
        ))
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Statement::try_from).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
