//! HTTP error type and error response payloads.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use core_auth::AuthError;
use core_library::LibraryError;
use core_sync::SyncError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable error code identifier
    pub error_code: &'static str,
    pub message: String,
    /// Set when a failed onboarding was rolled back and the client should
    /// restart the flow from the beginning
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub start_over: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("{message}")]
    NotFound { message: String },

    /// A sync is already running for this user.
    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    TooManyRequests { message: String },

    #[error("{message}")]
    Internal { message: String },

    /// Onboarding failed and was rolled back.
    #[error("{message}")]
    OnboardingFailed { status: StatusCode, message: String },
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::OnboardingFailed { status, .. } => *status,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "SYNC_IN_PROGRESS",
            Self::TooManyRequests { .. } => "TOO_MANY_REQUESTS",
            Self::Internal { .. } => "INTERNAL",
            Self::OnboardingFailed { .. } => "ONBOARDING_FAILED",
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        let message = err.to_string();
        match err {
            SyncError::SyncInProgress { .. } => Self::Conflict { message },
            SyncError::QuotaExceeded { .. }
            | SyncError::UpstreamQuotaExhausted(_)
            | SyncError::CronRateLimited => Self::TooManyRequests { message },
            SyncError::Unauthorized(_) | SyncError::CronUnauthorized => {
                Self::Unauthorized { message }
            }
            SyncError::Auth(e) => e.into(),
            SyncError::InvalidInput { .. } | SyncError::InvalidPhase(_) => {
                Self::BadRequest { message }
            }
            SyncError::NotFound { .. } => Self::NotFound { message },
            SyncError::Library(e) => e.into(),
            SyncError::OnboardingFailed { cause, rolled_back } => {
                let inner = ApiError::from(*cause);
                if rolled_back {
                    Self::OnboardingFailed {
                        status: inner.status(),
                        message,
                    }
                } else {
                    inner
                }
            }
            _ => Self::Internal { message },
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let message = err.to_string();
        match err {
            AuthError::NotAuthenticated { .. } | AuthError::TokenExpired { .. } => {
                Self::Unauthorized { message }
            }
            AuthError::InvalidUserId(_) => Self::BadRequest { message },
            AuthError::Storage(_) => Self::Internal { message },
        }
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        let message = err.to_string();
        match err {
            LibraryError::NotFound { .. } => Self::NotFound { message },
            LibraryError::InvalidInput { .. } => Self::BadRequest { message },
            LibraryError::Database(_) | LibraryError::Migration(_) => Self::Internal { message },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = ErrorBody {
            error_code: self.error_code(),
            start_over: matches!(self, Self::OnboardingFailed { .. }),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failures while assembling the service at startup.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::error::BridgeError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}
