//! Channel sync-state repository

use crate::error::Result;
use crate::models::ChannelSyncState;
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    async fn get(&self, user_id: &str, channel_id: &str) -> Result<Option<ChannelSyncState>>;

    /// Insert or replace the state for `(user_id, channel_id)`.
    async fn save(&self, state: &ChannelSyncState) -> Result<()>;
}

pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStateRepository for SqliteSyncStateRepository {
    async fn get(&self, user_id: &str, channel_id: &str) -> Result<Option<ChannelSyncState>> {
        let state = query_as::<_, ChannelSyncState>(
            "SELECT * FROM channel_sync_state WHERE user_id = ? AND channel_id = ?",
        )
        .bind(user_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn save(&self, state: &ChannelSyncState) -> Result<()> {
        query(
            r#"
            INSERT INTO channel_sync_state (
                user_id, channel_id, uploads_collection_id,
                last_synced_at, last_synced_video_id, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, channel_id) DO UPDATE SET
                uploads_collection_id = excluded.uploads_collection_id,
                last_synced_at = excluded.last_synced_at,
                last_synced_video_id = excluded.last_synced_video_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&state.user_id)
        .bind(&state.channel_id)
        .bind(&state.uploads_collection_id)
        .bind(state.last_synced_at)
        .bind(&state.last_synced_video_id)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
