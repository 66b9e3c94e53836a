//! Audit Pipeline Abstraction
//!
//! The sync core emits structured audit records for every consequential
//! action; an external sink persists and queries them. Only the interface
//! lives here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Outcome classification of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failure,
    Info,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Info => "info",
        }
    }
}

/// A single structured audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Event category (e.g. "sync.pull", "statement.resolve").
    pub event_type: String,
    /// Entity kind the action touched ("sync_job", "statement").
    pub entity_type: String,
    /// Identifier of the touched entity.
    pub entity_id: String,
    /// Verb describing what happened ("completed", "cancelled", "pushed").
    pub action: String,
    /// Outcome of the action.
    pub status: AuditStatus,
    /// Free-form structured context (counters, error text).
    pub details: Option<Value>,
}

impl AuditRecord {
    pub fn new(
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        action: impl Into<String>,
        status: AuditStatus,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action: action.into(),
            status,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Consumer of audit records.
///
/// Emission is fire-and-forget from the core's perspective: a sink failure
/// must never fail the sync operation that produced the record. The
/// `AuditEmitter` in `core-runtime` enforces that contract; sinks just do
/// their best to persist.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one audit record.
    async fn record(&self, record: AuditRecord) -> Result<()>;
}
