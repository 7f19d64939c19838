//! Access Token Storage
//!
//! The sync engine never performs a sign-in flow. It reads the platform
//! access token that the front end stored for the user and fails fast when
//! the token is missing or expired.
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::{SqliteTokenStore, TokenProvider, UserId};
//! use bridge_traits::time::SystemClock;
//! use std::sync::Arc;
//! # async fn example(pool: sqlx::SqlitePool) -> core_auth::Result<()> {
//! let store = SqliteTokenStore::new(pool, Arc::new(SystemClock));
//! let user = UserId::parse("user-1")?;
//!
//! let token = store.access_token(&user).await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, UserId};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Source of platform access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token for `user`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NotAuthenticated`] when nothing is stored
    /// - [`AuthError::TokenExpired`] when the stored token has expired
    async fn access_token(&self, user: &UserId) -> Result<AccessToken>;
}

/// Tokens held in process memory.
///
/// Used by tests and by single-user deployments that inject a token at
/// startup.
#[derive(Default)]
pub struct StaticTokenProvider {
    tokens: RwLock<HashMap<UserId, AccessToken>>,
}

impl StaticTokenProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(user: UserId, token: impl Into<String>) -> Self {
        let mut tokens = HashMap::new();
        tokens.insert(user, AccessToken::new(token, None));
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    pub async fn insert(&self, user: UserId, token: AccessToken) {
        self.tokens.write().await.insert(user, token);
    }

    pub async fn revoke(&self, user: &UserId) {
        self.tokens.write().await.remove(user);
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, user: &UserId) -> Result<AccessToken> {
        self.tokens
            .read()
            .await
            .get(user)
            .cloned()
            .ok_or_else(|| AuthError::NotAuthenticated {
                user_id: user.to_string(),
            })
    }
}

/// Tokens persisted in the `user_credentials` table.
#[derive(Clone)]
pub struct SqliteTokenStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    access_token: String,
    expires_at: Option<i64>,
}

impl SqliteTokenStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Insert or replace the token for `user`.
    #[instrument(skip(self, token), fields(user_id = %user))]
    pub async fn store(&self, user: &UserId, token: &AccessToken) -> Result<()> {
        let now = self.clock.unix_timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO user_credentials (user_id, access_token, expires_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                access_token = excluded.access_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user.as_str())
        .bind(token.secret())
        .bind(token.expires_at().map(|t| t.timestamp_millis()))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AuthError::Storage(e.to_string()))?;

        debug!("Stored access token");
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn delete(&self, user: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_credentials WHERE user_id = ?")
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TokenProvider for SqliteTokenStore {
    #[instrument(skip(self), fields(user_id = %user))]
    async fn access_token(&self, user: &UserId) -> Result<AccessToken> {
        let row: Option<CredentialRow> = sqlx::query_as(
            "SELECT access_token, expires_at FROM user_credentials WHERE user_id = ?",
        )
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuthError::Storage(e.to_string()))?;

        let row = row.ok_or_else(|| AuthError::NotAuthenticated {
            user_id: user.to_string(),
        })?;

        let expires_at = row
            .expires_at
            .and_then(DateTime::<Utc>::from_timestamp_millis);
        let token = AccessToken::new(row.access_token, expires_at);

        if token.is_expired_at(self.clock.now()) {
            warn!("Stored access token has expired");
            return Err(AuthError::TokenExpired {
                user_id: user.to_string(),
            });
        }

        Ok(token)
    }
}
