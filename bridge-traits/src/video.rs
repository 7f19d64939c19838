//! Video Platform Abstraction
//!
//! The three read calls the sync engine needs from a video platform: the
//! caller's subscriptions, a channel's uploads collection, and pages of that
//! collection. Every call is billable against a per-user daily quota, so the
//! trait also reports the cost of each call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A channel the authenticated user subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChannel {
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub subscribed_at: Option<DateTime<Utc>>,
}

/// Metadata for a single uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVideo {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub published_at: DateTime<Utc>,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

impl<T> RemotePage<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_page_token.is_some()
    }
}

/// Billable call kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCall {
    ListSubscriptions,
    ResolveUploads,
    ListUploads,
}

/// Read access to a video platform on behalf of one user.
///
/// Implementations must return uploads newest-first and must map revoked
/// credentials to [`BridgeError::Unauthorized`](crate::BridgeError::Unauthorized)
/// and upstream quota refusals to
/// [`BridgeError::QuotaExhausted`](crate::BridgeError::QuotaExhausted).
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// One page of the user's subscriptions.
    async fn list_subscriptions(
        &self,
        access_token: &str,
        page_token: Option<String>,
    ) -> Result<RemotePage<RemoteChannel>>;

    /// Identifier of the collection holding a channel's uploads.
    async fn uploads_collection_id(&self, access_token: &str, channel_id: &str) -> Result<String>;

    /// One page of a channel's uploads, newest first.
    async fn list_uploads(
        &self,
        access_token: &str,
        uploads_id: &str,
        page_token: Option<String>,
        page_size: u32,
    ) -> Result<RemotePage<RemoteVideo>>;

    /// Quota units billed for one call of the given kind.
    fn call_cost(&self, call: ApiCall) -> u32 {
        let _ = call;
        1
    }
}
