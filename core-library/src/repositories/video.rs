//! Video repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{new_id, NewVideo, Video};
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, SqlitePool};
use tracing::debug;

/// Video repository interface for data access operations
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Insert videos for one channel, skipping any already catalogued.
    ///
    /// Deduplication is keyed on `(channel, external video id)`, so fetching
    /// overlapping pages twice never creates a second row.
    ///
    /// # Returns
    /// Number of rows actually inserted
    async fn upsert_many(
        &self,
        user_id: &str,
        channel_id: &str,
        videos: &[NewVideo],
        now: i64,
    ) -> Result<u64>;

    async fn count_for_user(&self, user_id: &str) -> Result<i64>;

    async fn count_for_channel(&self, user_id: &str, channel_id: &str) -> Result<i64>;

    /// Newest-first uploads of one channel.
    async fn list_for_channel(
        &self,
        user_id: &str,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<Video>>;
}

/// SQLite implementation of VideoRepository
pub struct SqliteVideoRepository {
    pool: SqlitePool,
}

impl SqliteVideoRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VideoRepository for SqliteVideoRepository {
    async fn upsert_many(
        &self,
        user_id: &str,
        channel_id: &str,
        videos: &[NewVideo],
        now: i64,
    ) -> Result<u64> {
        if videos.is_empty() {
            return Ok(0);
        }

        if let Some(bad) = videos.iter().find(|v| v.external_video_id.trim().is_empty()) {
            return Err(LibraryError::InvalidInput {
                field: "external_video_id".to_string(),
                message: format!("empty id for video titled '{}'", bad.title),
            });
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for video in videos {
            let result = query(
                r#"
                INSERT INTO videos (
                    id, user_id, channel_id, external_video_id, title,
                    description, thumbnail_url, published_at, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(user_id, channel_id, external_video_id) DO NOTHING
                "#,
            )
            .bind(new_id())
            .bind(user_id)
            .bind(channel_id)
            .bind(&video.external_video_id)
            .bind(&video.title)
            .bind(&video.description)
            .bind(&video.thumbnail_url)
            .bind(video.published_at)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!(
            channel_id,
            offered = videos.len(),
            inserted,
            "Stored channel videos"
        );
        Ok(inserted)
    }

    async fn count_for_user(&self, user_id: &str) -> Result<i64> {
        let count = query_scalar::<_, i64>("SELECT COUNT(*) FROM videos WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn count_for_channel(&self, user_id: &str, channel_id: &str) -> Result<i64> {
        let count = query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM videos WHERE user_id = ? AND channel_id = ?",
        )
        .bind(user_id)
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_for_channel(
        &self,
        user_id: &str,
        channel_id: &str,
        limit: u32,
    ) -> Result<Vec<Video>> {
        let videos = query_as::<_, Video>(
            r#"
            SELECT * FROM videos
            WHERE user_id = ? AND channel_id = ?
            ORDER BY published_at DESC, external_video_id
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(channel_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(videos)
    }
}
