//! Error types for the YouTube provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// YouTube provider errors
#[derive(Error, Debug)]
pub enum YouTubeError {
    /// The access token was rejected
    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    /// The project's daily API quota is spent
    #[error("YouTube quota exceeded: {0}")]
    QuotaExceeded(String),

    /// API request returned an error
    #[error("YouTube API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Channel or playlist does not exist or is not visible
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for YouTube operations
pub type Result<T> = std::result::Result<T, YouTubeError>;

impl From<YouTubeError> for BridgeError {
    fn from(error: YouTubeError) -> Self {
        match error {
            YouTubeError::Unauthorized(msg) => BridgeError::Unauthorized(msg),
            YouTubeError::QuotaExceeded(msg) => BridgeError::QuotaExhausted(msg),
            YouTubeError::Bridge(e) => e,
            other => BridgeError::OperationFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = YouTubeError::ApiError {
            status_code: 500,
            message: "Backend error".to_string(),
        };

        assert_eq!(
            error.to_string(),
            "YouTube API error (status 500): Backend error"
        );
    }

    #[test]
    fn test_error_conversion_keeps_classification() {
        let unauthorized: BridgeError = YouTubeError::Unauthorized("revoked".to_string()).into();
        assert!(matches!(unauthorized, BridgeError::Unauthorized(_)));
        assert!(unauthorized.is_fatal());

        let quota: BridgeError = YouTubeError::QuotaExceeded("daily".to_string()).into();
        assert!(matches!(quota, BridgeError::QuotaExhausted(_)));

        let missing: BridgeError = YouTubeError::NotFound("UC1".to_string()).into();
        assert!(matches!(missing, BridgeError::OperationFailed(_)));
        assert!(!missing.is_fatal());
    }
}
