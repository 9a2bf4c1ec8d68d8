use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),
}

impl From<core_runtime::Error> for CoreError {
    fn from(error: core_runtime::Error) -> Self {
        CoreError::Sync(error.into())
    }
}

impl From<bridge_traits::BridgeError> for CoreError {
    fn from(error: bridge_traits::BridgeError) -> Self {
        CoreError::Sync(error.into())
    }
}

impl CoreError {
    /// A pass is already in flight; the caller can simply wait.
    pub fn is_already_running(&self) -> bool {
        matches!(
            self,
            CoreError::Sync(core_sync::SyncError::AlreadyRunning { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
