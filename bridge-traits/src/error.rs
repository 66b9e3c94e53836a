use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Remote entity not found: {0}")]
    NotFound(String),

    #[error("Remote call timed out after {0} seconds")]
    Timeout(u64),

    #[error("Remote rejected write: {reason}")]
    WriteRejected { reason: String },

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the failure is transient from the remote's point of view.
    ///
    /// Transient failures are recorded as soft errors during a sync job;
    /// the job keeps going with its remaining targets.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Unavailable(_) | BridgeError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
