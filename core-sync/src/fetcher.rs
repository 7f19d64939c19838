//! # Channel Fetcher
//!
//! Turns one channel's uploads into a lazy, newest-first stream of videos
//! that honors the channel's [`DepthPolicy`].
//!
//! The stream ends when the first of these happens:
//! - the depth cap is reached (`FixedCount`)
//! - a video at or before the last sync boundary is seen (`NewOnly`)
//! - the platform has no more pages
//!
//! Pages are requested only as the consumer pulls, and every request is
//! charged to the [`QuotaLedger`] once issued. Before any page after the
//! first, an empty budget ends the stream with [`SyncError::QuotaExceeded`].

use crate::quota::QuotaLedger;
use crate::{Result, SyncError};
use bridge_traits::video::{ApiCall, RemoteVideo, VideoSource};
use core_library::{ChannelSyncState, DepthPolicy};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Everything needed to walk one channel's uploads.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub user_id: String,
    pub access_token: String,
    pub uploads_id: String,
    pub policy: DepthPolicy,
    /// Unix milliseconds; `NewOnly` stops at videos published at or before it
    pub last_synced_at: Option<i64>,
    /// `NewOnly` also stops at this video
    pub last_synced_video_id: Option<String>,
}

impl FetchRequest {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        uploads_id: impl Into<String>,
        policy: DepthPolicy,
        state: &ChannelSyncState,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            uploads_id: uploads_id.into(),
            policy,
            last_synced_at: state.last_synced_at,
            last_synced_video_id: state.last_synced_video_id.clone(),
        }
    }

    fn is_past_boundary(&self, video: &RemoteVideo) -> bool {
        if self.policy != DepthPolicy::NewOnly {
            return false;
        }

        let seen_cursor = self
            .last_synced_video_id
            .as_deref()
            .is_some_and(|id| id == video.video_id);
        let too_old = self
            .last_synced_at
            .is_some_and(|at| video.published_at.timestamp_millis() <= at);

        seen_cursor || too_old
    }
}

pub struct ChannelFetcher {
    source: Arc<dyn VideoSource>,
    quota: Arc<dyn QuotaLedger>,
    page_size: u32,
}

impl ChannelFetcher {
    pub fn new(source: Arc<dyn VideoSource>, quota: Arc<dyn QuotaLedger>, page_size: u32) -> Self {
        Self {
            source,
            quota,
            page_size: page_size.max(1),
        }
    }

    /// Uploads collection id for `channel_id`, cached in `state`.
    ///
    /// Costs one billable call the first time per channel.
    #[instrument(skip(self, access_token, state))]
    pub async fn resolve_uploads_id(
        &self,
        user_id: &str,
        access_token: &str,
        channel_id: &str,
        state: &mut ChannelSyncState,
    ) -> Result<String> {
        if let Some(id) = &state.uploads_collection_id {
            return Ok(id.clone());
        }

        let result = self.source.uploads_collection_id(access_token, channel_id).await;
        self.quota
            .charge(user_id, self.source.call_cost(ApiCall::ResolveUploads))
            .await?;

        let uploads_id = result?;
        debug!(uploads_id = %uploads_id, "Resolved uploads collection");
        state.uploads_collection_id = Some(uploads_id.clone());
        Ok(uploads_id)
    }

    /// Lazy stream of videos newer than the boundary, newest first.
    ///
    /// `NewOnly` on a channel that was never synced yields nothing and makes
    /// no call.
    pub fn fetch_new_videos(&self, request: FetchRequest) -> BoxStream<'static, Result<RemoteVideo>> {
        if request.policy == DepthPolicy::NewOnly && request.last_synced_at.is_none() {
            return stream::empty().boxed();
        }

        let walker = PageWalker {
            source: self.source.clone(),
            quota: self.quota.clone(),
            page_size: self.page_size,
            request,
            buffer: VecDeque::new(),
            next_page: None,
            pages_fetched: 0,
            yielded: 0,
            done: false,
        };

        stream::try_unfold(walker, |mut walker| async move {
            let next = walker.next_video().await?;
            Ok(next.map(|video| (video, walker)))
        })
        .boxed()
    }
}

struct PageWalker {
    source: Arc<dyn VideoSource>,
    quota: Arc<dyn QuotaLedger>,
    page_size: u32,
    request: FetchRequest,
    buffer: VecDeque<RemoteVideo>,
    next_page: Option<String>,
    pages_fetched: u32,
    yielded: u32,
    done: bool,
}

impl PageWalker {
    async fn next_video(&mut self) -> Result<Option<RemoteVideo>> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(cap) = self.request.policy.cap() {
                if self.yielded >= cap {
                    self.done = true;
                    return Ok(None);
                }
            }

            if let Some(video) = self.buffer.pop_front() {
                if self.request.is_past_boundary(&video) {
                    self.done = true;
                    return Ok(None);
                }
                self.yielded += 1;
                return Ok(Some(video));
            }

            if self.pages_fetched > 0 && self.next_page.is_none() {
                self.done = true;
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let user_id = self.request.user_id.as_str();

        if self.pages_fetched > 0 {
            let remaining = self.quota.remaining(user_id).await?;
            if remaining == 0 {
                self.done = true;
                return Err(SyncError::QuotaExceeded {
                    user_id: user_id.to_string(),
                    requested: self.source.call_cost(ApiCall::ListUploads),
                    remaining,
                });
            }
        }

        // Never ask for more than the cap still needs
        let page_size = match self.request.policy.cap() {
            Some(cap) => self.page_size.min(cap.saturating_sub(self.yielded).max(1)),
            None => self.page_size,
        };

        let result = self
            .source
            .list_uploads(
                &self.request.access_token,
                &self.request.uploads_id,
                self.next_page.take(),
                page_size,
            )
            .await;
        self.quota
            .charge(user_id, self.source.call_cost(ApiCall::ListUploads))
            .await?;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };

        self.pages_fetched += 1;
        debug!(
            page = self.pages_fetched,
            items = page.items.len(),
            has_more = page.has_more(),
            "Fetched uploads page"
        );

        self.next_page = page.next_page_token;
        self.buffer.extend(page.items);
        Ok(())
    }
}
