use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// Credentials were rejected by the remote service (revoked or expired).
    #[error("Remote service rejected credentials: {0}")]
    Unauthorized(String),

    /// The remote service refused the call because its own quota is spent.
    #[error("Remote quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Errors that no amount of per-item retrying can fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Unauthorized(_) | BridgeError::NotAvailable(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
