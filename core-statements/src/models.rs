//! Domain models for tracked control statements
//!
//! The `Statement` is the unit of synchronization: one record per remote
//! control statement, carrying both the last-known remote content and any
//! pending local edit, plus the sync-state machine that relates them.

use crate::error::StatementError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Type
// =============================================================================

/// Unique local identifier for a statement, assigned on first creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatementId(Uuid);

impl StatementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, StatementError> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| StatementError::InvalidId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for StatementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Sync State
// =============================================================================

/// Where a statement stands relative to its remote counterpart.
///
/// ```text
/// new ──pull──> synced <──push/resolve── modified
///                 │  \                      │
///                edit  \____pull drift___ conflict
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Created by a pull, never reconciled since.
    New,
    /// Local and remote agree; nothing pending.
    Synced,
    /// Local edit pending push.
    Modified,
    /// Local edit and remote drift overlap; needs operator resolution.
    Conflict,
}

impl SyncState {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::New => "new",
            SyncState::Synced => "synced",
            SyncState::Modified => "modified",
            SyncState::Conflict => "conflict",
        }
    }
}

impl FromStr for SyncState {
    type Err = StatementError;

    fn from_str(s: &str) -> Result<Self, StatementError> {
        match s.to_lowercase().as_str() {
            "new" => Ok(SyncState::New),
            "synced" => Ok(SyncState::Synced),
            "modified" => Ok(SyncState::Modified),
            "conflict" => Ok(SyncState::Conflict),
            _ => Err(StatementError::InvalidSyncState(s.to_string())),
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Conflict Resolution
// =============================================================================

/// Operator choice when a statement is in conflict.
///
/// `Merge` requires caller-supplied merged content; the other two take none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the pending local edit; statement stays push-eligible.
    KeepLocal,
    /// Discard the local edit and accept the remote value.
    KeepRemote,
    /// Replace the local edit with operator-merged content.
    Merge,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::KeepLocal => "keep_local",
            ConflictResolution::KeepRemote => "keep_remote",
            ConflictResolution::Merge => "merge",
        }
    }
}

impl FromStr for ConflictResolution {
    type Err = StatementError;

    fn from_str(s: &str) -> Result<Self, StatementError> {
        match s.to_lowercase().as_str() {
            "keep_local" => Ok(ConflictResolution::KeepLocal),
            "keep_remote" => Ok(ConflictResolution::KeepRemote),
            "merge" => Ok(ConflictResolution::Merge),
            _ => Err(StatementError::InvalidResolution(s.to_string())),
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Statement
// =============================================================================

/// One tracked control statement.
///
/// Timestamps are Unix epoch seconds. `remote_id` is immutable once set;
/// `remote_updated_at` is the remote-side last-modified stamp that drives
/// conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    /// Local identifier, stable across the record's lifetime.
    pub id: StatementId,
    /// System (authorization boundary) the statement belongs to.
    pub system_id: String,
    /// Control the statement is attached to.
    pub control_ref: String,
    /// Remote system's identifier for this statement.
    pub remote_id: String,
    /// Statement type label from the remote service.
    pub kind: String,
    /// Last-known remote value.
    pub remote_content: String,
    /// User-edited value, if any.
    pub local_content: Option<String>,
    /// True iff local content has diverged from remote since the last
    /// successful sync.
    pub is_modified: bool,
    /// Current sync state.
    pub sync_state: SyncState,
    /// Remote-side last-modified time.
    pub remote_updated_at: Option<i64>,
    /// Local edit time.
    pub modified_at: Option<i64>,
    /// Who made the local edit.
    pub modified_by: Option<String>,
    /// Last time a pull touched this record.
    pub last_pull_at: Option<i64>,
    /// Last successful push.
    pub last_push_at: Option<i64>,
    /// When the last conflict resolution was applied.
    pub conflict_resolved_at: Option<i64>,
    /// When first created.
    pub created_at: i64,
    /// Last local mutation of any kind.
    pub updated_at: i64,
}

impl Statement {
    /// The content value surfaced to editors and to push.
    ///
    /// Derived, never stored: the local edit wins while one is pending and
    /// non-empty, otherwise the last-known remote value.
    pub fn effective_content(&self) -> &str {
        match &self.local_content {
            Some(local) if self.is_modified && !local.is_empty() => local,
            _ => &self.remote_content,
        }
    }

    /// Whether a push would send this statement.
    pub fn is_push_eligible(&self) -> bool {
        self.sync_state == SyncState::Modified && self.is_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_statement() -> Statement {
        Statement {
            id: StatementId::new(),
            system_id: "sys-1".to_string(),
            control_ref: "AC-2".to_string(),
            remote_id: "r-100".to_string(),
            kind: "implementation".to_string(),
            remote_content: "remote".to_string(),
            local_content: None,
            is_modified: false,
            sync_state: SyncState::Synced,
            remote_updated_at: Some(100),
            modified_at: None,
            modified_by: None,
            last_pull_at: Some(100),
            last_push_at: None,
            conflict_resolved_at: None,
            created_at: 100,
            updated_at: 100,
        }
    }

    #[test]
    fn test_statement_id_roundtrip() {
        let id = StatementId::new();
        let parsed = StatementId::from_string(&id.as_str()).unwrap();
        assert_eq!(parsed, id);

        assert!(StatementId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_sync_state_parsing() {
        assert_eq!("new".parse::<SyncState>().unwrap(), SyncState::New);
        assert_eq!("SYNCED".parse::<SyncState>().unwrap(), SyncState::Synced);
        assert_eq!(
            "conflict".parse::<SyncState>().unwrap(),
            SyncState::Conflict
        );
        assert!("stale".parse::<SyncState>().is_err());
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!(
            "keep_local".parse::<ConflictResolution>().unwrap(),
            ConflictResolution::KeepLocal
        );
        assert_eq!(
            "merge".parse::<ConflictResolution>().unwrap(),
            ConflictResolution::Merge
        );
        assert!("discard".parse::<ConflictResolution>().is_err());
    }

    #[test]
    fn test_effective_content_prefers_pending_local_edit() {
        let mut statement = base_statement();
        assert_eq!(statement.effective_content(), "remote");

        statement.local_content = Some("local".to_string());
        statement.is_modified = true;
        statement.sync_state = SyncState::Modified;
        assert_eq!(statement.effective_content(), "local");
    }

    #[test]
    fn test_effective_content_empty_local_falls_back() {
        let mut statement = base_statement();
        statement.local_content = Some(String::new());
        statement.is_modified = true;
        assert_eq!(statement.effective_content(), "remote");
    }

    #[test]
    fn test_effective_content_ignores_stale_local() {
        // A cleared is_modified flag means the local value no longer counts,
        // whatever the column holds.
        let mut statement = base_statement();
        statement.local_content = Some("stale".to_string());
        statement.is_modified = false;
        assert_eq!(statement.effective_content(), "remote");
    }

    #[test]
    fn test_push_eligibility() {
        let mut statement = base_statement();
        assert!(!statement.is_push_eligible());

        statement.local_content = Some("local".to_string());
        statement.is_modified = true;
        statement.sync_state = SyncState::Modified;
        assert!(statement.is_push_eligible());

        statement.sync_state = SyncState::Conflict;
        assert!(!statement.is_push_eligible());
    }
}
