//! Error types for Google Drive provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Google Drive provider errors
#[derive(Error, Debug)]
pub enum GoogleDriveError {
    /// Token expired, revoked or lacking scope
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Non-retryable API error
    #[error("Google Drive API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limit exceeded, retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Google Drive unavailable (status {status_code})")]
    ServerError { status_code: u16 },

    #[error("File not found: {file_id}")]
    FileNotFound { file_id: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    BridgeError(#[from] BridgeError),
}

/// Result type for Google Drive operations
pub type Result<T> = std::result::Result<T, GoogleDriveError>;

impl From<GoogleDriveError> for BridgeError {
    fn from(error: GoogleDriveError) -> Self {
        match error {
            GoogleDriveError::AuthenticationFailed(msg) => BridgeError::Auth(msg),
            GoogleDriveError::RateLimitExceeded {
                retry_after_seconds,
            } => BridgeError::Transient(format!(
                "Google Drive rate limit exceeded, retry after {} seconds",
                retry_after_seconds
            )),
            GoogleDriveError::ServerError { status_code } => {
                BridgeError::Transient(format!("Google Drive returned {}", status_code))
            }
            GoogleDriveError::BridgeError(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = GoogleDriveError::ApiError {
            status_code: 400,
            message: "Invalid query".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "Google Drive API error (status 400): Invalid query"
        );
    }

    #[test]
    fn test_error_conversion_keeps_taxonomy() {
        let auth: BridgeError =
            GoogleDriveError::AuthenticationFailed("Token expired".to_string()).into();
        assert!(auth.is_auth());

        let limited: BridgeError = GoogleDriveError::RateLimitExceeded {
            retry_after_seconds: 5,
        }
        .into();
        assert!(limited.is_transient());

        let missing: BridgeError = GoogleDriveError::FileNotFound {
            file_id: "x".to_string(),
        }
        .into();
        assert!(matches!(missing, BridgeError::OperationFailed(_)));
    }
}
