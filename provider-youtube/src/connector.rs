//! YouTube Data API connector implementation
//!
//! Implements the `VideoSource` trait for YouTube Data API v3.

use async_trait::async_trait;
use bridge_traits::error::Result;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use bridge_traits::video::{RemoteChannel, RemotePage, RemoteVideo, VideoSource};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::YouTubeError;
use crate::types::{
    ChannelListResponse, ErrorResponse, PlaylistItem, PlaylistItemListResponse, Subscription,
    SubscriptionListResponse,
};

/// YouTube Data API base URL
pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// Maximum results per page (YouTube Data API limit)
pub const MAX_PAGE_SIZE: u32 = 50;

/// Error reasons YouTube uses when the project quota is spent
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded", "rateLimitExceeded"];

/// YouTube Data API connector
///
/// # Features
///
/// - Paginated subscription listing for the token's owner
/// - Uploads playlist lookup per channel
/// - Newest-first uploads listing with private and deleted entries dropped
/// - Retry with exponential backoff for 429 and 5xx
///
/// # Example
///
/// ```ignore
/// use provider_youtube::YouTubeConnector;
/// use bridge_traits::video::VideoSource;
///
/// let connector = YouTubeConnector::new(http_client, YOUTUBE_API_BASE);
/// let page = connector.list_subscriptions(&token, None).await?;
/// ```
pub struct YouTubeConnector {
    http_client: Arc<dyn HttpClient>,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl YouTubeConnector {
    /// Create a connector talking to `base_url` (no trailing slash needed).
    pub fn new(http_client: Arc<dyn HttpClient>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    fn parse_timestamp(rfc3339: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(rfc3339)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn convert_subscription(subscription: Subscription) -> Option<RemoteChannel> {
        let snippet = subscription.snippet;
        let channel_id = snippet.resource_id.channel_id?;

        Some(RemoteChannel {
            channel_id,
            title: snippet.title,
            thumbnail_url: snippet.thumbnails.best_url(),
            subscribed_at: snippet
                .published_at
                .as_deref()
                .and_then(Self::parse_timestamp),
        })
    }

    /// Private and deleted videos carry no publish date and are dropped.
    fn convert_playlist_item(item: PlaylistItem, channel_fallback: &str) -> Option<RemoteVideo> {
        let details = item.content_details?;
        let published_at = details
            .video_published_at
            .as_deref()
            .and_then(Self::parse_timestamp)?;
        let video_id = details.video_id.or(item.snippet.resource_id.video_id)?;

        Some(RemoteVideo {
            video_id,
            channel_id: item
                .snippet
                .channel_id
                .unwrap_or_else(|| channel_fallback.to_string()),
            title: item.snippet.title,
            description: item.snippet.description.filter(|d| !d.is_empty()),
            thumbnail_url: item.snippet.thumbnails.best_url(),
            published_at,
        })
    }

    fn classify_failure(response: &HttpResponse) -> YouTubeError {
        let envelope = serde_json::from_slice::<ErrorResponse>(&response.body).ok();
        let message = envelope
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).to_string());

        let quota_refusal = envelope
            .as_ref()
            .map(|e| {
                e.error
                    .errors
                    .iter()
                    .any(|d| QUOTA_REASONS.contains(&d.reason.as_str()))
            })
            .unwrap_or(false);

        match response.status {
            401 => YouTubeError::Unauthorized(message),
            403 if quota_refusal => YouTubeError::QuotaExceeded(message),
            404 => YouTubeError::NotFound(message),
            status_code => YouTubeError::ApiError {
                status_code,
                message,
            },
        }
    }

    #[instrument(skip(self, access_token), fields(url = %url))]
    async fn get_json<T: DeserializeOwned>(&self, url: String, access_token: &str) -> Result<T> {
        let request = HttpRequest::get(url)
            .bearer_token(access_token)
            .header("Accept", "application/json");

        let response = self
            .http_client
            .execute_with_retry(request, self.retry_policy.clone())
            .await?;

        if !response.is_success() {
            let error = Self::classify_failure(&response);
            warn!(status = response.status, error = %error, "YouTube API request failed");
            return Err(error.into());
        }

        debug!(status = response.status, "API request succeeded");

        serde_json::from_slice(&response.body).map_err(|e| {
            YouTubeError::ParseError(format!("Failed to parse API response: {}", e)).into()
        })
    }
}

#[async_trait]
impl VideoSource for YouTubeConnector {
    #[instrument(skip(self, access_token))]
    async fn list_subscriptions(
        &self,
        access_token: &str,
        page_token: Option<String>,
    ) -> Result<RemotePage<RemoteChannel>> {
        let mut url = format!(
            "{}/subscriptions?part=snippet&mine=true&maxResults={}&order=alphabetical",
            self.base_url, MAX_PAGE_SIZE
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(&token)));
        }

        let response: SubscriptionListResponse = self.get_json(url, access_token).await?;

        let items: Vec<RemoteChannel> = response
            .items
            .into_iter()
            .filter_map(Self::convert_subscription)
            .collect();

        info!(count = items.len(), "Listed subscriptions page");

        Ok(RemotePage {
            items,
            next_page_token: response.next_page_token,
        })
    }

    #[instrument(skip(self, access_token))]
    async fn uploads_collection_id(&self, access_token: &str, channel_id: &str) -> Result<String> {
        let url = format!(
            "{}/channels?part=contentDetails&id={}",
            self.base_url,
            urlencoding::encode(channel_id)
        );

        let response: ChannelListResponse = self.get_json(url, access_token).await?;

        response
            .items
            .into_iter()
            .find(|c| c.id == channel_id)
            .and_then(|c| c.content_details.related_playlists.uploads)
            .ok_or_else(|| {
                YouTubeError::NotFound(format!("No uploads playlist for channel {}", channel_id))
                    .into()
            })
    }

    #[instrument(skip(self, access_token))]
    async fn list_uploads(
        &self,
        access_token: &str,
        uploads_id: &str,
        page_token: Option<String>,
        page_size: u32,
    ) -> Result<RemotePage<RemoteVideo>> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let mut url = format!(
            "{}/playlistItems?part=snippet,contentDetails&playlistId={}&maxResults={}",
            self.base_url,
            urlencoding::encode(uploads_id),
            page_size
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(&token)));
        }

        let response: PlaylistItemListResponse = self.get_json(url, access_token).await?;
        let received = response.items.len();

        let mut items: Vec<RemoteVideo> = response
            .items
            .into_iter()
            .filter_map(|item| Self::convert_playlist_item(item, uploads_id))
            .collect();
        // Uploads playlists are newest-first already; keep it guaranteed
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        debug!(received, kept = items.len(), "Listed uploads page");

        Ok(RemotePage {
            items,
            next_page_token: response.next_page_token,
        })
    }
}
