//! Remote GRC Service Abstractions
//!
//! Traits for the two directions the sync core talks to the remote
//! governance/risk/compliance service: content retrieval (pull) and
//! statement write-back (push).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Default bound for a single remote call when an adapter does not override
/// [`GrcContentSource::call_timeout`] / [`GrcWriteSink::call_timeout`].
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One control statement as the remote service reports it.
///
/// The tuple the sync engine merges from: which control the statement
/// belongs to, the remote's stable identifier for it, its type label,
/// the content body, and the remote-side last-modified stamp used for
/// conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStatement {
    /// Control the statement is attached to (e.g. "AC-2", "AU-12").
    pub control_ref: String,
    /// Remote system's identifier for this statement; immutable.
    pub statement_ref: String,
    /// Statement type label as the remote models it (e.g. "implementation").
    pub kind: String,
    /// Statement body.
    pub content: String,
    /// Remote last-modified time, Unix epoch seconds.
    pub remote_updated_at: i64,
}

/// Content retrieval side of the remote GRC service.
///
/// One call covers the full discovery chain for a system: its controls and
/// each control's statements, flattened into [`RemoteStatement`] records.
/// Pagination, token refresh, and wire retries are the adapter's problem.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::grc::GrcContentSource;
///
/// async fn fetch(source: &dyn GrcContentSource) -> bridge_traits::error::Result<()> {
///     let statements = source.list_control_statements("system-17").await?;
///     for s in statements {
///         println!("{} / {}: {} bytes", s.control_ref, s.statement_ref, s.content.len());
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait GrcContentSource: Send + Sync {
    /// List all control statements for a system.
    ///
    /// # Errors
    ///
    /// - `Unavailable` if the remote service cannot be reached
    /// - `NotFound` if the system does not exist remotely
    async fn list_control_statements(&self, system_id: &str) -> Result<Vec<RemoteStatement>>;

    /// Upper bound the engine applies to a single call to this source.
    ///
    /// Exceeding it is treated as a per-item soft error, never a fatal one.
    fn call_timeout(&self) -> Duration {
        DEFAULT_CALL_TIMEOUT
    }
}

/// Write-back side of the remote GRC service.
#[async_trait]
pub trait GrcWriteSink: Send + Sync {
    /// Replace the content of a remote statement.
    ///
    /// # Errors
    ///
    /// - `WriteRejected` if the remote refuses the update
    /// - `Unavailable` if the remote service cannot be reached
    /// - `NotFound` if the statement no longer exists remotely
    async fn write_statement(&self, remote_id: &str, content: &str) -> Result<()>;

    /// Upper bound the engine applies to a single call to this sink.
    fn call_timeout(&self) -> Duration {
        DEFAULT_CALL_TIMEOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_statement_roundtrip() {
        let statement = RemoteStatement {
            control_ref: "AC-2".to_string(),
            statement_ref: "stmt-991".to_string(),
            kind: "implementation".to_string(),
            content: "Accounts are provisioned through the IdP.".to_string(),
            remote_updated_at: 1_700_000_000,
        };

        let json = serde_json::to_string(&statement).unwrap();
        let back: RemoteStatement = serde_json::from_str(&json).unwrap();
        assert_eq!(back, statement);
    }
}
