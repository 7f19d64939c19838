//! Channel repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{new_id, Channel, DepthPolicy, NewChannel, PriorityTier};
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, SqlitePool};

/// Channel repository interface for data access operations
///
/// Every listing returns channels in a stable order (title, then id) so a
/// sync run can fix its iteration order up front.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Insert a subscription or refresh its title and thumbnail.
    ///
    /// Depth policy and tier survive a refresh.
    async fn upsert_subscription(
        &self,
        user_id: &str,
        channel: &NewChannel,
        now: i64,
    ) -> Result<Channel>;

    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Channel>>;

    async fn find_by_external_id(
        &self,
        user_id: &str,
        external_channel_id: &str,
    ) -> Result<Option<Channel>>;

    /// All of a user's channels.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Channel>>;

    /// Channels that belong to one group.
    async fn list_in_group(&self, user_id: &str, group_id: &str) -> Result<Vec<Channel>>;

    /// Channels that belong to at least one group.
    async fn list_grouped(&self, user_id: &str) -> Result<Vec<Channel>>;

    /// Channels in one priority tier.
    async fn list_by_tier(&self, user_id: &str, tier: PriorityTier) -> Result<Vec<Channel>>;

    /// Users owning at least one channel in `tier`, sorted.
    async fn users_with_tier(&self, tier: PriorityTier) -> Result<Vec<String>>;

    /// Set or clear (`None`) a channel's depth policy.
    async fn set_depth_policy(
        &self,
        user_id: &str,
        id: &str,
        policy: Option<DepthPolicy>,
        now: i64,
    ) -> Result<()>;

    async fn set_priority_tier(
        &self,
        user_id: &str,
        id: &str,
        tier: PriorityTier,
        now: i64,
    ) -> Result<()>;

    async fn count(&self, user_id: &str) -> Result<i64>;
}

/// SQLite implementation of ChannelRepository
pub struct SqliteChannelRepository {
    pool: SqlitePool,
}

impl SqliteChannelRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn not_found(id: &str) -> LibraryError {
        LibraryError::NotFound {
            entity_type: "Channel".to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl ChannelRepository for SqliteChannelRepository {
    async fn upsert_subscription(
        &self,
        user_id: &str,
        channel: &NewChannel,
        now: i64,
    ) -> Result<Channel> {
        channel
            .validate()
            .map_err(|e| LibraryError::InvalidInput {
                field: "Channel".to_string(),
                message: e,
            })?;

        let stored = query_as::<_, Channel>(
            r#"
            INSERT INTO channels (
                id, user_id, external_channel_id, title, thumbnail_url,
                subscribed_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, external_channel_id) DO UPDATE SET
                title = excluded.title,
                thumbnail_url = excluded.thumbnail_url,
                subscribed_at = COALESCE(excluded.subscribed_at, channels.subscribed_at),
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(new_id())
        .bind(user_id)
        .bind(&channel.external_channel_id)
        .bind(&channel.title)
        .bind(&channel.thumbnail_url)
        .bind(channel.subscribed_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn find_by_id(&self, user_id: &str, id: &str) -> Result<Option<Channel>> {
        let channel =
            query_as::<_, Channel>("SELECT * FROM channels WHERE user_id = ? AND id = ?")
                .bind(user_id)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(channel)
    }

    async fn find_by_external_id(
        &self,
        user_id: &str,
        external_channel_id: &str,
    ) -> Result<Option<Channel>> {
        let channel = query_as::<_, Channel>(
            "SELECT * FROM channels WHERE user_id = ? AND external_channel_id = ?",
        )
        .bind(user_id)
        .bind(external_channel_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(channel)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<Channel>> {
        let channels = query_as::<_, Channel>(
            "SELECT * FROM channels WHERE user_id = ? ORDER BY title COLLATE NOCASE, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn list_in_group(&self, user_id: &str, group_id: &str) -> Result<Vec<Channel>> {
        let channels = query_as::<_, Channel>(
            r#"
            SELECT c.* FROM channels c
            INNER JOIN channel_group_members m ON m.channel_id = c.id
            WHERE c.user_id = ? AND m.group_id = ?
            ORDER BY c.title COLLATE NOCASE, c.id
            "#,
        )
        .bind(user_id)
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn list_grouped(&self, user_id: &str) -> Result<Vec<Channel>> {
        let channels = query_as::<_, Channel>(
            r#"
            SELECT c.* FROM channels c
            WHERE c.user_id = ?
              AND EXISTS (SELECT 1 FROM channel_group_members m WHERE m.channel_id = c.id)
            ORDER BY c.title COLLATE NOCASE, c.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn list_by_tier(&self, user_id: &str, tier: PriorityTier) -> Result<Vec<Channel>> {
        let channels = query_as::<_, Channel>(
            r#"
            SELECT * FROM channels
            WHERE user_id = ? AND priority_tier = ?
            ORDER BY title COLLATE NOCASE, id
            "#,
        )
        .bind(user_id)
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(channels)
    }

    async fn users_with_tier(&self, tier: PriorityTier) -> Result<Vec<String>> {
        let users = query_scalar::<_, String>(
            "SELECT DISTINCT user_id FROM channels WHERE priority_tier = ? ORDER BY user_id",
        )
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn set_depth_policy(
        &self,
        user_id: &str,
        id: &str,
        policy: Option<DepthPolicy>,
        now: i64,
    ) -> Result<()> {
        let result = query(
            "UPDATE channels SET depth_policy = ?, updated_at = ? WHERE user_id = ? AND id = ?",
        )
        .bind(policy.map(|p| p.as_db_value()))
        .bind(now)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }

        Ok(())
    }

    async fn set_priority_tier(
        &self,
        user_id: &str,
        id: &str,
        tier: PriorityTier,
        now: i64,
    ) -> Result<()> {
        let result = query(
            "UPDATE channels SET priority_tier = ?, updated_at = ? WHERE user_id = ? AND id = ?",
        )
        .bind(tier.as_str())
        .bind(now)
        .bind(user_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id));
        }

        Ok(())
    }

    async fn count(&self, user_id: &str) -> Result<i64> {
        let count = query_scalar::<_, i64>("SELECT COUNT(*) FROM channels WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::repositories::{GroupRepository, SqliteGroupRepository};

    fn subscription(external: &str, title: &str) -> NewChannel {
        NewChannel {
            external_channel_id: external.to_string(),
            title: title.to_string(),
            thumbnail_url: None,
            subscribed_at: Some(1_000),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_keeps_settings() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteChannelRepository::new(pool);

        let first = repo
            .upsert_subscription("u1", &subscription("UC1", "Old Title"), 10)
            .await
            .unwrap();
        repo.set_depth_policy("u1", &first.id, Some(DepthPolicy::NewOnly), 11)
            .await
            .unwrap();

        let second = repo
            .upsert_subscription("u1", &subscription("UC1", "New Title"), 20)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.title, "New Title");
        assert_eq!(second.depth_policy().unwrap(), Some(DepthPolicy::NewOnly));
        assert_eq!(second.created_at, 10);
        assert_eq!(repo.count("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_blank_title() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteChannelRepository::new(pool);

        let result = repo
            .upsert_subscription("u1", &subscription("UC1", " "), 10)
            .await;
        assert!(matches!(result, Err(LibraryError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_listings_are_ordered_and_scoped() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteChannelRepository::new(pool.clone());
        let groups = SqliteGroupRepository::new(pool);

        let b = repo.upsert_subscription("u1", &subscription("UC2", "beta"), 1).await.unwrap();
        let a = repo.upsert_subscription("u1", &subscription("UC1", "Alpha"), 1).await.unwrap();
        let c = repo.upsert_subscription("u1", &subscription("UC3", "Gamma"), 1).await.unwrap();
        repo.upsert_subscription("u2", &subscription("UC1", "Alpha"), 1).await.unwrap();

        let all: Vec<_> = repo
            .list_for_user("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|ch| ch.id)
            .collect();
        assert_eq!(all, vec![a.id.clone(), b.id.clone(), c.id.clone()]);

        let group = groups.get_or_create("u1", "Favourites", 1).await.unwrap();
        groups.add_channel(&group.id, &c.id).await.unwrap();
        groups.add_channel(&group.id, &a.id).await.unwrap();

        let in_group: Vec<_> = repo
            .list_in_group("u1", &group.id)
            .await
            .unwrap()
            .into_iter()
            .map(|ch| ch.title)
            .collect();
        assert_eq!(in_group, vec!["Alpha", "Gamma"]);
        assert_eq!(repo.list_grouped("u1").await.unwrap().len(), 2);
        assert!(repo.list_grouped("u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tiers() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteChannelRepository::new(pool);

        let a = repo.upsert_subscription("u2", &subscription("UC1", "A"), 1).await.unwrap();
        repo.upsert_subscription("u1", &subscription("UC1", "A"), 1).await.unwrap();
        let c = repo.upsert_subscription("u1", &subscription("UC2", "B"), 1).await.unwrap();

        repo.set_priority_tier("u2", &a.id, PriorityTier::High, 2).await.unwrap();
        repo.set_priority_tier("u1", &c.id, PriorityTier::High, 2).await.unwrap();

        assert_eq!(
            repo.users_with_tier(PriorityTier::High).await.unwrap(),
            vec!["u1".to_string(), "u2".to_string()]
        );
        assert_eq!(repo.list_by_tier("u1", PriorityTier::High).await.unwrap().len(), 1);
        assert_eq!(repo.list_by_tier("u1", PriorityTier::Normal).await.unwrap().len(), 1);

        let missing = repo
            .set_priority_tier("u1", "nope", PriorityTier::Low, 3)
            .await;
        assert!(matches!(missing, Err(LibraryError::NotFound { .. })));
    }
}
