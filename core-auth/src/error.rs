use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No credentials stored for user {user_id}")]
    NotAuthenticated { user_id: String },

    #[error("Access token for user {user_id} expired")]
    TokenExpired { user_id: String },

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Credential storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Credentials are missing or unusable, as opposed to a storage fault.
    pub fn is_credential_problem(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated { .. } | AuthError::TokenExpired { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
