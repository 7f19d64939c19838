//! User-scoped bulk deletion
//!
//! These are the primitives used to return a user's catalog to empty after
//! a failed onboarding, and the backing for the delete-all endpoints. Each
//! call runs in a single transaction so a crash never leaves a half-deleted
//! catalog behind.

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{query, Sqlite, SqlitePool, Transaction};
use tracing::{info, instrument};

/// Rows removed by [`LibraryPurge::purge_user`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub group_memberships: u64,
    pub groups: u64,
    pub sync_states: u64,
    pub videos: u64,
    pub channels: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.group_memberships + self.groups + self.sync_states + self.videos + self.channels
    }
}

#[async_trait]
pub trait LibraryPurge: Send + Sync {
    /// Delete every group, channel, video and sync state the user owns.
    async fn purge_user(&self, user_id: &str) -> Result<PurgeReport>;

    /// Delete all of the user's videos and forget per-channel sync positions
    /// so the next sync fetches again. Channels and groups stay.
    async fn delete_all_videos(&self, user_id: &str) -> Result<u64>;

    /// Delete all of the user's groups and their memberships.
    async fn delete_all_groups(&self, user_id: &str) -> Result<u64>;
}

pub struct SqliteLibraryPurge {
    pool: SqlitePool,
}

impl SqliteLibraryPurge {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn delete_groups_in(tx: &mut Transaction<'_, Sqlite>, user_id: &str) -> Result<(u64, u64)> {
        let memberships = query(
            r#"
            DELETE FROM channel_group_members
            WHERE group_id IN (SELECT id FROM channel_groups WHERE user_id = ?)
            "#,
        )
        .bind(user_id)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        let groups = query("DELETE FROM channel_groups WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok((memberships, groups))
    }
}

#[async_trait]
impl LibraryPurge for SqliteLibraryPurge {
    #[instrument(skip(self))]
    async fn purge_user(&self, user_id: &str) -> Result<PurgeReport> {
        let mut tx = self.pool.begin().await?;

        let (group_memberships, groups) = Self::delete_groups_in(&mut tx, user_id).await?;

        let sync_states = query("DELETE FROM channel_sync_state WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // Videos reference channels, so they go first
        let videos = query("DELETE FROM videos WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let channels = query("DELETE FROM channels WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        let report = PurgeReport {
            group_memberships,
            groups,
            sync_states,
            videos,
            channels,
        };
        info!(rows = report.total(), ?report, "Purged user catalog");

        Ok(report)
    }

    #[instrument(skip(self))]
    async fn delete_all_videos(&self, user_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let videos = query("DELETE FROM videos WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        query(
            r#"
            UPDATE channel_sync_state
            SET last_synced_at = NULL, last_synced_video_id = NULL
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(videos, "Deleted all videos");
        Ok(videos)
    }

    #[instrument(skip(self))]
    async fn delete_all_groups(&self, user_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let (_, groups) = Self::delete_groups_in(&mut tx, user_id).await?;
        tx.commit().await?;

        info!(groups, "Deleted all groups");
        Ok(groups)
    }
}
