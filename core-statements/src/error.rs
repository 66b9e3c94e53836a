use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("Statement {id} not found")]
    NotFound { id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Statement {id} is not in conflict state")]
    NotInConflict { id: String },

    #[error("Invalid state for {operation}: statement {id} is {state}")]
    InvalidState {
        id: String,
        state: String,
        operation: String,
    },

    #[error("Statement {id} changed concurrently: {message}")]
    Conflict { id: String, message: String },

    #[error("Invalid sync state: {0}")]
    InvalidSyncState(String),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid statement ID: {0}")]
    InvalidId(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StatementError>;
