//! # Cancellation
//!
//! A running sync holds a [`CancellationToken`] registered under its user.
//! [`CancellationRegistry::request`] trips the token for runs in this
//! process and also records a row in `sync_cancellations`, so a run owned by
//! another worker process sees the request at its next channel boundary.
//!
//! A new run clears any leftover request when it registers, so a cancel sent
//! while nothing was running never kills the next run.

use crate::Result;
use bridge_traits::time::Clock;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct CancellationRegistry {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            clock,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh token for a run that is starting. Drops stale requests.
    pub async fn register(&self, user_id: &str) -> Result<CancellationToken> {
        sqlx::query("DELETE FROM sync_cancellations WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let token = CancellationToken::new();
        self.tokens
            .lock()
            .await
            .insert(user_id.to_string(), token.clone());

        debug!(user_id, "Registered cancellation token");
        Ok(token)
    }

    /// Ask the user's current run to stop.
    ///
    /// Returns `true` when a run in this process was signalled directly.
    pub async fn request(&self, user_id: &str) -> Result<bool> {
        sqlx::query(
            r#"
            INSERT INTO sync_cancellations (user_id, requested_at)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET requested_at = excluded.requested_at
            "#,
        )
        .bind(user_id)
        .bind(self.clock.unix_timestamp_millis())
        .execute(&self.pool)
        .await?;

        let signalled = match self.tokens.lock().await.get(user_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };

        info!(user_id, signalled, "Cancellation requested");
        Ok(signalled)
    }

    /// Whether the run holding `token` should stop.
    pub async fn is_cancelled(&self, user_id: &str, token: &CancellationToken) -> Result<bool> {
        if token.is_cancelled() {
            return Ok(true);
        }

        let requested: Option<(i64,)> =
            sqlx::query_as("SELECT requested_at FROM sync_cancellations WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        if requested.is_some() {
            token.cancel();
            return Ok(true);
        }

        Ok(false)
    }

    /// Consume any request and forget the run's token.
    pub async fn clear(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_cancellations WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.tokens.lock().await.remove(user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::SystemClock;
    use core_library::create_test_pool;

    async fn setup() -> CancellationRegistry {
        let pool = create_test_pool().await.unwrap();
        CancellationRegistry::new(pool, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_request_trips_registered_token() {
        let registry = setup().await;
        let token = registry.register("u1").await.unwrap();
        assert!(!registry.is_cancelled("u1", &token).await.unwrap());

        assert!(registry.request("u1").await.unwrap());
        assert!(token.is_cancelled());
        assert!(registry.is_cancelled("u1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_request_from_another_process_is_seen() {
        let registry = setup().await;
        let token = registry.register("u1").await.unwrap();

        // Another worker shares the database but not the token map
        let other = CancellationRegistry::new(registry.pool.clone(), Arc::new(SystemClock));
        assert!(!other.request("u1").await.unwrap());

        assert!(registry.is_cancelled("u1", &token).await.unwrap());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_stale_request_does_not_cancel_next_run() {
        let registry = setup().await;
        assert!(!registry.request("u1").await.unwrap());

        let token = registry.register("u1").await.unwrap();
        assert!(!registry.is_cancelled("u1", &token).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_consumes_request() {
        let registry = setup().await;
        let token = registry.register("u1").await.unwrap();
        registry.request("u1").await.unwrap();

        registry.clear("u1").await.unwrap();

        let next = CancellationToken::new();
        assert!(!registry.is_cancelled("u1", &next).await.unwrap());
        assert!(token.is_cancelled());
        assert!(!registry.request("u2").await.unwrap());
    }
}
