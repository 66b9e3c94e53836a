//! Pure conflict-detection and resolution logic
//!
//! Decision functions with no I/O. The store calls [`classify_remote_merge`]
//! on every pull-side upsert and [`plan_resolution`] when an operator
//! resolves a conflict; both are trivially unit-testable in isolation.

use crate::error::{Result, StatementError};
use crate::models::{ConflictResolution, Statement, SyncState};

/// What a pull-side upsert should do with an incoming remote version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No record exists yet; create it in `new` state.
    Created,
    /// No local edit pending; take the remote value, state `synced`.
    RemoteRefreshed,
    /// Local edit pending and the remote has not moved; leave content alone.
    RemoteUnchanged,
    /// Local edit pending and the remote moved underneath it: overwrite the
    /// remote copy, preserve the local edit verbatim, state `conflict`.
    ConflictDetected,
}

/// Classify an incoming remote version against the stored record.
///
/// The heart of conflict detection. "Moved" means the incoming
/// `remote_updated_at` is strictly newer than the stored one; a stale or
/// duplicate delivery never disturbs a pending edit.
pub fn classify_remote_merge(
    existing: Option<&Statement>,
    incoming_updated_at: i64,
) -> MergeOutcome {
    let Some(statement) = existing else {
        return MergeOutcome::Created;
    };

    if !statement.is_modified {
        return MergeOutcome::RemoteRefreshed;
    }

    match statement.remote_updated_at {
        Some(stored) if incoming_updated_at > stored => MergeOutcome::ConflictDetected,
        // A record carrying a local edit but no recorded remote stamp has
        // never completed a pull; any stamped remote version is drift.
        None => MergeOutcome::ConflictDetected,
        Some(_) => MergeOutcome::RemoteUnchanged,
    }
}

/// Field-level outcome of a conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionPlan {
    /// Keep the local edit; state becomes `modified` (still needs a push).
    KeepLocal,
    /// Drop the local edit; state becomes `synced`.
    KeepRemote,
    /// Replace the local edit with merged content; state becomes `modified`.
    Merge { content: String },
}

/// Compute the outcome of applying `resolution` to `statement`.
///
/// Resolution is not a generic content-setter: anything other than a
/// statement currently in `conflict` is rejected.
///
/// # Errors
///
/// - `NotInConflict` if the statement is not conflicted
/// - `InvalidInput` for a `merge` without non-empty merged content
pub fn plan_resolution(
    statement: &Statement,
    resolution: ConflictResolution,
    merged_content: Option<&str>,
) -> Result<ResolutionPlan> {
    if statement.sync_state != SyncState::Conflict {
        return Err(StatementError::NotInConflict {
            id: statement.id.to_string(),
        });
    }

    match resolution {
        ConflictResolution::KeepLocal => Ok(ResolutionPlan::KeepLocal),
        ConflictResolution::KeepRemote => Ok(ResolutionPlan::KeepRemote),
        ConflictResolution::Merge => match merged_content {
            Some(content) if !content.is_empty() => Ok(ResolutionPlan::Merge {
                content: content.to_string(),
            }),
            _ => Err(StatementError::InvalidInput {
                field: "merged_content".to_string(),
                message: "merge resolution requires non-empty merged content".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatementId;

    fn statement(state: SyncState, is_modified: bool, remote_updated_at: Option<i64>) -> Statement {
        Statement {
            id: StatementId::new(),
            system_id: "sys-1".to_string(),
            control_ref: "AC-2".to_string(),
            remote_id: "r-1".to_string(),
            kind: "implementation".to_string(),
            remote_content: "remote".to_string(),
            local_content: is_modified.then(|| "local".to_string()),
            is_modified,
            sync_state: state,
            remote_updated_at,
            modified_at: None,
            modified_by: None,
            last_pull_at: remote_updated_at,
            last_push_at: None,
            conflict_resolved_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_absent_record_is_created() {
        assert_eq!(classify_remote_merge(None, 100), MergeOutcome::Created);
    }

    #[test]
    fn test_unmodified_record_is_refreshed() {
        let s = statement(SyncState::Synced, false, Some(100));
        assert_eq!(
            classify_remote_merge(Some(&s), 200),
            MergeOutcome::RemoteRefreshed
        );
        // Even an identical stamp refreshes remote fields
        assert_eq!(
            classify_remote_merge(Some(&s), 100),
            MergeOutcome::RemoteRefreshed
        );
    }

    #[test]
    fn test_modified_record_unchanged_remote_is_noop() {
        let s = statement(SyncState::Modified, true, Some(100));
        assert_eq!(
            classify_remote_merge(Some(&s), 100),
            MergeOutcome::RemoteUnchanged
        );
        // Stale deliveries never disturb a pending edit
        assert_eq!(
            classify_remote_merge(Some(&s), 50),
            MergeOutcome::RemoteUnchanged
        );
    }

    #[test]
    fn test_modified_record_newer_remote_is_conflict() {
        let s = statement(SyncState::Modified, true, Some(100));
        assert_eq!(
            classify_remote_merge(Some(&s), 101),
            MergeOutcome::ConflictDetected
        );
    }

    #[test]
    fn test_plan_resolution_rejects_non_conflict() {
        for state in [SyncState::New, SyncState::Synced, SyncState::Modified] {
            let s = statement(state, false, Some(100));
            let err = plan_resolution(&s, ConflictResolution::KeepRemote, None).unwrap_err();
            assert!(matches!(err, StatementError::NotInConflict { .. }));
        }
    }

    #[test]
    fn test_plan_resolution_outcomes() {
        let s = statement(SyncState::Conflict, true, Some(200));

        assert_eq!(
            plan_resolution(&s, ConflictResolution::KeepLocal, None).unwrap(),
            ResolutionPlan::KeepLocal
        );
        assert_eq!(
            plan_resolution(&s, ConflictResolution::KeepRemote, None).unwrap(),
            ResolutionPlan::KeepRemote
        );
        assert_eq!(
            plan_resolution(&s, ConflictResolution::Merge, Some("merged")).unwrap(),
            ResolutionPlan::Merge {
                content: "merged".to_string()
            }
        );
    }

    #[test]
    fn test_plan_resolution_merge_requires_content() {
        let s = statement(SyncState::Conflict, true, Some(200));

        let err = plan_resolution(&s, ConflictResolution::Merge, None).unwrap_err();
        assert!(matches!(err, StatementError::InvalidInput { .. }));

        let err = plan_resolution(&s, ConflictResolution::Merge, Some("")).unwrap_err();
        assert!(matches!(err, StatementError::InvalidInput { .. }));
    }
}
