//! Group repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::Group;
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, SqlitePool};

/// Group repository interface for data access operations
#[async_trait]
pub trait GroupRepository: Send + Sync {
    /// Return the user's group named `name`, creating it when absent.
    async fn get_or_create(&self, user_id: &str, name: &str, now: i64) -> Result<Group>;

    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Group>>;

    /// The user's groups, sorted by name.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Group>>;

    /// Add a channel to a group. Adding twice is a no-op.
    async fn add_channel(&self, group_id: &str, channel_id: &str) -> Result<()>;

    /// Internal channel ids in a group.
    async fn channel_ids(&self, group_id: &str) -> Result<Vec<String>>;
}

/// SQLite implementation of GroupRepository
pub struct SqliteGroupRepository {
    pool: SqlitePool,
}

impl SqliteGroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for SqliteGroupRepository {
    async fn get_or_create(&self, user_id: &str, name: &str, now: i64) -> Result<Group> {
        let candidate = Group::new(user_id, name.trim(), now);
        candidate
            .validate()
            .map_err(|e| LibraryError::InvalidInput {
                field: "Group".to_string(),
                message: e,
            })?;

        query(
            r#"
            INSERT INTO channel_groups (id, user_id, name, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, name) DO NOTHING
            "#,
        )
        .bind(&candidate.id)
        .bind(&candidate.user_id)
        .bind(&candidate.name)
        .bind(candidate.created_at)
        .execute(&self.pool)
        .await?;

        let group = query_as::<_, Group>(
            "SELECT * FROM channel_groups WHERE user_id = ? AND name = ?",
        )
        .bind(&candidate.user_id)
        .bind(&candidate.name)
        .fetch_one(&self.pool)
        .await?;

        Ok(group)
    }

    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Group>> {
        let group =
            query_as::<_, Group>("SELECT * FROM channel_groups WHERE user_id = ? AND id = ?")
                .bind(user_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(group)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Group>> {
        let groups = query_as::<_, Group>(
            "SELECT * FROM channel_groups WHERE user_id = ? ORDER BY name COLLATE NOCASE, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(groups)
    }

    async fn add_channel(&self, group_id: &str, channel_id: &str) -> Result<()> {
        query("INSERT OR IGNORE INTO channel_group_members (group_id, channel_id) VALUES (?, ?)")
            .bind(group_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn channel_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let ids = query_scalar::<_, String>(
            "SELECT channel_id FROM channel_group_members WHERE group_id = ? ORDER BY channel_id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteGroupRepository::new(pool);

        let first = repo.get_or_create("u1", "Tech", 1).await.unwrap();
        let second = repo.get_or_create("u1", " Tech ", 2).await.unwrap();
        let other_user = repo.get_or_create("u2", "Tech", 3).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.created_at, 1);
        assert_ne!(first.id, other_user.id);
        assert_eq!(repo.list_for_user("u1").await.unwrap().len(), 1);
        assert!(repo.find_by_id("u2", &first.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_name() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteGroupRepository::new(pool);

        let result = repo.get_or_create("u1", "   ", 1).await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_membership_requires_channel() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteGroupRepository::new(pool);
        let group = repo.get_or_create("u1", "News", 1).await.unwrap();

        // Foreign keys are enforced
        assert!(repo.add_channel(&group.id, "missing-channel").await.is_err());
        assert!(repo.channel_ids(&group.id).await.unwrap().is_empty());
    }
}
