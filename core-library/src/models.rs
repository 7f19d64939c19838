//! Catalog domain models
//!
//! Row types map one-to-one onto the SQLite schema in `migrations/`.
//! Enumerations that are stored as text ([`DepthPolicy`], [`PriorityTier`])
//! are parsed on access so a bad value surfaces as an error instead of
//! silently changing sync behavior.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LibraryError;

/// How many uploads a sync pulls for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "count")]
pub enum DepthPolicy {
    /// Only uploads newer than the last sync. Never backfills.
    NewOnly,
    /// At most `n` most recent uploads.
    FixedCount(u32),
    /// Every upload the platform returns.
    Unlimited,
}

impl DepthPolicy {
    /// Text form stored in `channels.depth_policy`.
    pub fn as_db_value(&self) -> String {
        match self {
            DepthPolicy::NewOnly => "new_only".to_string(),
            DepthPolicy::FixedCount(n) => n.to_string(),
            DepthPolicy::Unlimited => "all".to_string(),
        }
    }

    /// Upper bound on videos yielded, if any.
    pub fn cap(&self) -> Option<u32> {
        match self {
            DepthPolicy::FixedCount(n) => Some(*n),
            DepthPolicy::NewOnly | DepthPolicy::Unlimited => None,
        }
    }
}

impl fmt::Display for DepthPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_db_value())
    }
}

impl FromStr for DepthPolicy {
    type Err = LibraryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "new_only" => Ok(DepthPolicy::NewOnly),
            "all" => Ok(DepthPolicy::Unlimited),
            other => other
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .map(DepthPolicy::FixedCount)
                .ok_or_else(|| LibraryError::InvalidInput {
                    field: "depth_policy".to_string(),
                    message: format!("'{}' is not new_only, all or a positive count", other),
                }),
        }
    }
}

/// Scheduler bucket a channel is refreshed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Normal,
    Low,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityTier::High => "high",
            PriorityTier::Normal => "normal",
            PriorityTier::Low => "low",
        }
    }
}

impl Default for PriorityTier {
    fn default() -> Self {
        PriorityTier::Normal
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityTier {
    type Err = LibraryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(PriorityTier::High),
            "normal" => Ok(PriorityTier::Normal),
            "low" => Ok(PriorityTier::Low),
            other => Err(LibraryError::InvalidInput {
                field: "priority_tier".to_string(),
                message: format!("unknown tier '{}'", other),
            }),
        }
    }
}

/// A subscribed channel in a user's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Channel {
    /// Unique identifier
    pub id: String,
    pub user_id: String,
    /// Platform identifier, e.g. `UC...`
    pub external_channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    /// Stored depth policy, see [`DepthPolicy::as_db_value`]
    pub depth_policy: Option<String>,
    pub priority_tier: String,
    pub subscribed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Channel {
    /// Parsed depth policy, `None` when the channel uses the service default.
    pub fn depth_policy(&self) -> Result<Option<DepthPolicy>, LibraryError> {
        self.depth_policy.as_deref().map(str::parse).transpose()
    }

    pub fn tier(&self) -> Result<PriorityTier, LibraryError> {
        self.priority_tier.parse()
    }
}

/// Subscription data used to create or refresh a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub external_channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub subscribed_at: Option<i64>,
}

impl NewChannel {
    pub fn validate(&self) -> Result<(), String> {
        if self.external_channel_id.trim().is_empty() {
            return Err("Channel id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err("Channel title cannot be empty".to_string());
        }
        Ok(())
    }
}

/// A catalogued upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Video {
    pub id: String,
    pub user_id: String,
    /// Internal [`Channel::id`]
    pub channel_id: String,
    pub external_video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: i64,
    pub created_at: i64,
}

/// Upload metadata ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub external_video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: i64,
}

/// A user-defined collection of channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: i64,
}

impl Group {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, now: i64) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            name: name.into(),
            created_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Group name cannot be empty".to_string());
        }
        if self.name.chars().count() > 100 {
            return Err("Group name cannot exceed 100 characters".to_string());
        }
        Ok(())
    }
}

/// Per-channel incremental sync position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChannelSyncState {
    pub user_id: String,
    pub channel_id: String,
    /// Resolved once and reused by later syncs
    pub uploads_collection_id: Option<String>,
    pub last_synced_at: Option<i64>,
    /// Newest upload seen by the last sync
    pub last_synced_video_id: Option<String>,
    pub updated_at: i64,
}

impl ChannelSyncState {
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
            uploads_collection_id: None,
            last_synced_at: None,
            last_synced_video_id: None,
            updated_at: now,
        }
    }

    /// A channel that has never completed a sync.
    pub fn is_never_synced(&self) -> bool {
        self.last_synced_at.is_none()
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_policy_parsing() {
        assert_eq!("new_only".parse::<DepthPolicy>().unwrap(), DepthPolicy::NewOnly);
        assert_eq!("all".parse::<DepthPolicy>().unwrap(), DepthPolicy::Unlimited);
        assert_eq!("25".parse::<DepthPolicy>().unwrap(), DepthPolicy::FixedCount(25));
        assert!("0".parse::<DepthPolicy>().is_err());
        assert!("lots".parse::<DepthPolicy>().is_err());

        for policy in [
            DepthPolicy::NewOnly,
            DepthPolicy::FixedCount(10),
            DepthPolicy::Unlimited,
        ] {
            assert_eq!(policy.as_db_value().parse::<DepthPolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn test_depth_policy_cap() {
        assert_eq!(DepthPolicy::FixedCount(3).cap(), Some(3));
        assert_eq!(DepthPolicy::Unlimited.cap(), None);
        assert_eq!(DepthPolicy::NewOnly.cap(), None);
    }

    #[test]
    fn test_priority_tier_parsing() {
        assert_eq!("HIGH".parse::<PriorityTier>().unwrap(), PriorityTier::High);
        assert_eq!(PriorityTier::default(), PriorityTier::Normal);
        assert!("urgent".parse::<PriorityTier>().is_err());
    }

    #[test]
    fn test_channel_accessors() {
        let channel = Channel {
            id: "c1".to_string(),
            user_id: "u1".to_string(),
            external_channel_id: "UC1".to_string(),
            title: "Channel".to_string(),
            thumbnail_url: None,
            depth_policy: Some("5".to_string()),
            priority_tier: "low".to_string(),
            subscribed_at: None,
            created_at: 0,
            updated_at: 0,
        };

        assert_eq!(channel.depth_policy().unwrap(), Some(DepthPolicy::FixedCount(5)));
        assert_eq!(channel.tier().unwrap(), PriorityTier::Low);
    }

    #[test]
    fn test_group_validation() {
        assert!(Group::new("u1", "Music", 0).validate().is_ok());
        assert!(Group::new("u1", "  ", 0).validate().is_err());
        assert!(Group::new("u1", "x".repeat(101), 0).validate().is_err());
    }
}
