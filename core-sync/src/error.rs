use bridge_traits::error::BridgeError;
use core_auth::AuthError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already in progress for user {user_id}")]
    SyncInProgress { user_id: String },

    #[error("Quota exceeded for user {user_id}: requested {requested} units, {remaining} remaining")]
    QuotaExceeded {
        user_id: String,
        requested: u32,
        remaining: u32,
    },

    /// The platform refused a call because its own quota is spent.
    #[error("Upstream quota exhausted: {0}")]
    UpstreamQuotaExhausted(String),

    #[error("Platform rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Sync timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid sync phase: {0}")]
    InvalidPhase(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// Another run took over this user's progress record.
    #[error("Sync run for user {user_id} was superseded")]
    Superseded { user_id: String },

    /// Onboarding failed; `rolled_back` tells whether the catalog was emptied.
    #[error("Onboarding failed: {cause}")]
    OnboardingFailed {
        cause: Box<SyncError>,
        rolled_back: bool,
    },

    #[error("Invalid cron secret")]
    CronUnauthorized,

    #[error("Too many invalid cron attempts")]
    CronRateLimited,

    #[error("Database error: {0}")]
    Database(String),

    /// The task driving a run panicked or was aborted.
    #[error("Sync task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Library(#[from] LibraryError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl SyncError {
    /// Errors that end the whole run rather than one channel.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Unauthorized(_)
            | SyncError::Superseded { .. }
            | SyncError::Database(_)
            | SyncError::Library(LibraryError::Database(_)) => true,
            SyncError::Auth(e) => e.is_credential_problem(),
            _ => false,
        }
    }

    /// Quota ran out, locally or upstream. Ends a run gracefully.
    pub fn is_quota_exhaustion(&self) -> bool {
        matches!(
            self,
            SyncError::QuotaExceeded { .. } | SyncError::UpstreamQuotaExhausted(_)
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Unauthorized(msg) => SyncError::Unauthorized(msg),
            BridgeError::QuotaExhausted(msg) => SyncError::UpstreamQuotaExhausted(msg),
            other => SyncError::Provider(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(error: sqlx::Error) -> Self {
        SyncError::Database(error.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(error: serde_json::Error) -> Self {
        SyncError::Database(format!("Invalid stored JSON: {}", error))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
