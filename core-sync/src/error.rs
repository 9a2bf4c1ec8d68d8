use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or unusable configuration; retrying will not help.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote rejected our credentials; needs operator re-setup.
    #[error("Remote authentication failed: {0}")]
    Auth(String),

    /// Network or rate-limit failure; the next trigger may succeed.
    #[error("Remote temporarily unavailable: {0}")]
    Transient(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("Sync already in progress (lock held since {since})")]
    AlreadyRunning { since: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Folder tree deeper than {limit} levels at folder {folder_id}")]
    TreeDepthExceeded { limit: usize, folder_id: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },
}

impl SyncError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }

    /// Whether a later trigger can reasonably succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_)
                | SyncError::Provider(_)
                | SyncError::LocalIo(_)
                | SyncError::AlreadyRunning { .. }
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Auth(msg) => SyncError::Auth(msg),
            BridgeError::Transient(msg) => SyncError::Transient(msg),
            BridgeError::Io(e) => SyncError::LocalIo(e),
            BridgeError::NotAvailable(msg) | BridgeError::OperationFailed(msg) => {
                SyncError::Provider(msg)
            }
        }
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(error: core_runtime::Error) -> Self {
        match error {
            core_runtime::Error::Config(msg) => SyncError::Config(msg),
            core_runtime::Error::Io(e) => SyncError::LocalIo(e),
            core_runtime::Error::Serialization(e) => SyncError::Serialization(e),
            core_runtime::Error::Internal(msg) => SyncError::Provider(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
