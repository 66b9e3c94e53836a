use core_statements::StatementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Statement {statement_id} not found")]
    StatementNotFound { statement_id: String },

    #[error("Sync already in progress for target {target}")]
    SyncInProgress { target: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid job status: {0}")]
    InvalidStatus(String),

    #[error("Invalid job kind: {0}")]
    InvalidJobKind(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(#[from] StatementError),

    #[error("Fatal sync error: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
