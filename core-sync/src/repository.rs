//! # Sync Progress Repository
//!
//! Persists one [`SyncProgress`] row per user.
//!
//! ## Single-flight
//!
//! [`SyncProgressRepository::try_begin`] claims the row with one conditional
//! upsert. The claim succeeds only when the existing row is terminal, idle,
//! or abandoned (not written to since `takeover_before`). Two concurrent
//! claims for the same user cannot both succeed.
//!
//! Every later write is fenced on `run_id`, so a run that was taken over
//! learns it through [`SyncError::Superseded`] instead of clobbering the new
//! run's snapshot.

use crate::progress::{ChannelError, SyncProgress, SyncStats};
use crate::{Result, SyncError};
use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

#[async_trait]
pub trait SyncProgressRepository: Send + Sync {
    /// Claim the user's progress row for a new run.
    ///
    /// Returns `false` when another run holds it.
    async fn try_begin(&self, progress: &SyncProgress, takeover_before: i64) -> Result<bool>;

    /// Persist a snapshot of the run identified by `progress.run_id`.
    ///
    /// # Errors
    ///
    /// [`SyncError::Superseded`] when the row now belongs to another run.
    async fn save(&self, progress: &SyncProgress) -> Result<()>;

    /// Latest snapshot for the user, if any run ever started.
    async fn find(&self, user_id: &str) -> Result<Option<SyncProgress>>;
}

/// SQLite implementation of SyncProgressRepository
pub struct SqliteSyncProgressRepository {
    pool: SqlitePool,
}

impl SqliteSyncProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a progress snapshot
#[derive(Debug, FromRow)]
struct SyncProgressRow {
    user_id: String,
    run_id: String,
    run_trigger: String,
    phase: String,
    current_count: i64,
    total_count: i64,
    current_item: Option<String>,
    message: Option<String>,
    channels_processed: i64,
    channels_failed: i64,
    videos_added: i64,
    errors: String,
    started_at: i64,
    updated_at: i64,
}

impl TryFrom<SyncProgressRow> for SyncProgress {
    type Error = SyncError;

    fn try_from(row: SyncProgressRow) -> Result<Self> {
        let errors: Vec<ChannelError> = serde_json::from_str(&row.errors)?;

        Ok(SyncProgress {
            user_id: row.user_id,
            run_id: row.run_id,
            trigger: row.run_trigger.parse()?,
            phase: row.phase.parse()?,
            current: row.current_count.max(0) as u32,
            total: row.total_count.max(0) as u32,
            current_item: row.current_item,
            message: row.message,
            stats: SyncStats {
                channels_processed: row.channels_processed.max(0) as u32,
                channels_failed: row.channels_failed.max(0) as u32,
                videos_added: row.videos_added.max(0) as u64,
            },
            errors,
            started_at: row.started_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl SyncProgressRepository for SqliteSyncProgressRepository {
    async fn try_begin(&self, progress: &SyncProgress, takeover_before: i64) -> Result<bool> {
        let errors = serde_json::to_string(&progress.errors)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_progress (
                user_id, run_id, run_trigger, phase, current_count, total_count,
                current_item, message, channels_processed, channels_failed,
                videos_added, errors, started_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                run_id = excluded.run_id,
                run_trigger = excluded.run_trigger,
                phase = excluded.phase,
                current_count = excluded.current_count,
                total_count = excluded.total_count,
                current_item = excluded.current_item,
                message = excluded.message,
                channels_processed = excluded.channels_processed,
                channels_failed = excluded.channels_failed,
                videos_added = excluded.videos_added,
                errors = excluded.errors,
                started_at = excluded.started_at,
                updated_at = MAX(sync_progress.updated_at, excluded.updated_at)
            WHERE sync_progress.phase IN ('completed', 'failed', 'idle')
               OR sync_progress.updated_at < ?
            "#,
        )
        .bind(&progress.user_id)
        .bind(&progress.run_id)
        .bind(progress.trigger.as_str())
        .bind(progress.phase.as_str())
        .bind(progress.current as i64)
        .bind(progress.total as i64)
        .bind(&progress.current_item)
        .bind(&progress.message)
        .bind(progress.stats.channels_processed as i64)
        .bind(progress.stats.channels_failed as i64)
        .bind(progress.stats.videos_added as i64)
        .bind(errors)
        .bind(progress.started_at)
        .bind(progress.updated_at)
        .bind(takeover_before)
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(user_id = %progress.user_id, run_id = %progress.run_id, claimed, "Single-flight claim");
        Ok(claimed)
    }

    async fn save(&self, progress: &SyncProgress) -> Result<()> {
        let errors = serde_json::to_string(&progress.errors)?;

        let result = sqlx::query(
            r#"
            UPDATE sync_progress SET
                phase = ?,
                current_count = ?,
                total_count = ?,
                current_item = ?,
                message = ?,
                channels_processed = ?,
                channels_failed = ?,
                videos_added = ?,
                errors = ?,
                updated_at = MAX(updated_at, ?)
            WHERE user_id = ? AND run_id = ?
            "#,
        )
        .bind(progress.phase.as_str())
        .bind(progress.current as i64)
        .bind(progress.total as i64)
        .bind(&progress.current_item)
        .bind(&progress.message)
        .bind(progress.stats.channels_processed as i64)
        .bind(progress.stats.channels_failed as i64)
        .bind(progress.stats.videos_added as i64)
        .bind(errors)
        .bind(progress.updated_at)
        .bind(&progress.user_id)
        .bind(&progress.run_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::Superseded {
                user_id: progress.user_id.clone(),
            });
        }

        Ok(())
    }

    async fn find(&self, user_id: &str) -> Result<Option<SyncProgress>> {
        let row = sqlx::query_as::<_, SyncProgressRow>(
            "SELECT * FROM sync_progress WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SyncProgress::try_from).transpose()
    }
}
