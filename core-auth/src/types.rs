use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, Result};

const MAX_USER_ID_LEN: usize = 128;

/// Identity of the user a sync operation acts for.
///
/// Every persisted record (progress, quota, channels, videos) is keyed by
/// this value.
///
/// # Examples
///
/// ```
/// use core_auth::UserId;
///
/// let user = UserId::parse("user-123").unwrap();
/// assert_eq!(user.as_str(), "user-123");
/// assert!(UserId::parse("  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Parse and validate a user id.
    ///
    /// Ids must be non-empty after trimming, at most 128 characters and free
    /// of control characters.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();

        if trimmed.is_empty() {
            return Err(AuthError::InvalidUserId("user id is empty".to_string()));
        }
        if trimmed.chars().count() > MAX_USER_ID_LEN {
            return Err(AuthError::InvalidUserId(format!(
                "user id longer than {} characters",
                MAX_USER_ID_LEN
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(AuthError::InvalidUserId(
                "user id contains control characters".to_string(),
            ));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserId {
    type Error = AuthError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Platform access token for one user.
///
/// `Debug` never prints the secret value.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens without an expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires| expires <= now)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
