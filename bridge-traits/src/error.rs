use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The remote rejected our credentials (expired token, revoked grant).
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Network failure, rate limiting or an upstream 5xx.
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::Auth(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
