//! # Sync Orchestrator
//!
//! Runs subscription imports, video syncs and onboarding for one user at a
//! time, and keeps that user's [`SyncProgress`] record current while it
//! works.
//!
//! ## Workflow
//!
//! ### Video sync
//! 1. Claim the user's single-flight slot (`starting`)
//! 2. Drop any stale cancellation request and register a fresh token
//! 3. Enumerate the channels in scope, in a fixed order
//! 4. For each channel (`syncing_videos`):
//!    - stop as `failed` ("cancelled") when cancellation was requested
//!    - stop as `completed` when the quota is spent or the deadline passed
//!    - otherwise fetch, upsert deduplicated videos, save the channel's sync
//!      position and write a snapshot
//! 5. `completing`, then `completed` with final stats
//!
//! A failing channel is recorded in `errors` and the run moves on. Errors
//! that no later channel could avoid (revoked credentials, a lost progress
//! row, a broken database) end the run as `failed`.
//!
//! Each run is driven on its own Tokio task, so a caller that stops waiting
//! (a dropped request, a server timeout) does not strand it mid-channel. Use
//! [`SyncOrchestrator::cancel`] to stop a run.
//!
//! ### Onboarding
//! Imports subscriptions, creates the requested groups, then syncs their
//! videos at the onboarding depth, all in one run. Any failure other than a
//! cancellation empties the user's catalog through the
//! [`RollbackCoordinator`] so the next attempt starts clean.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{SyncConfig, SyncDependencies, SyncOrchestrator, SyncScope};
//!
//! let orchestrator = SyncOrchestrator::new(SyncConfig::default(), dependencies)?;
//! let result = orchestrator.sync_videos(&user, SyncScope::All).await?;
//! println!("Imported {} videos", result.videos_imported);
//! ```

use crate::{
    cancellation::CancellationRegistry,
    fetcher::{ChannelFetcher, FetchRequest},
    progress::{ChannelError, SyncPhase, SyncProgress, SyncTrigger},
    quota::{QuotaLedger, SqliteQuotaLedger},
    repository::{SqliteSyncProgressRepository, SyncProgressRepository},
    rollback::RollbackCoordinator,
    Result, SyncError,
};
use bridge_traits::{
    time::Clock,
    video::{ApiCall, RemoteVideo, VideoSource},
};
use chrono::{DateTime, Utc};
use core_auth::{TokenProvider, UserId};
use core_library::{
    repositories::{
        ChannelRepository, GroupRepository, SqliteChannelRepository, SqliteGroupRepository,
        SqliteSyncStateRepository, SqliteVideoRepository, SyncStateRepository, VideoRepository,
    },
    Channel, ChannelSyncState, DepthPolicy, Group, LibraryError, LibraryPurge, NewChannel,
    NewVideo, PriorityTier, SqliteLibraryPurge,
};
use core_runtime::{
    config::SyncServiceConfig,
    events::{CoreEvent, EventBus, SyncEvent},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Depth for channels without their own policy
    pub default_depth: DepthPolicy,

    /// Depth for channels synced during onboarding
    pub onboarding_depth: DepthPolicy,

    /// Uploads requested per page
    pub page_size: u32,

    /// Wall-clock budget of one run; channels after it are skipped
    pub execution_ceiling: Duration,

    /// A non-terminal progress row untouched this long is abandoned. Also
    /// the hard timeout of a run.
    pub takeover_after: Duration,

    pub quota_daily_limit: u32,

    /// Minutes east of UTC where the quota day starts
    pub quota_reset_offset_minutes: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_depth: DepthPolicy::FixedCount(50),
            onboarding_depth: DepthPolicy::FixedCount(10),
            page_size: 50,
            execution_ceiling: Duration::from_secs(300),
            takeover_after: Duration::from_secs(360),
            quota_daily_limit: crate::quota::DEFAULT_DAILY_LIMIT,
            quota_reset_offset_minutes: crate::quota::DEFAULT_RESET_OFFSET_MINUTES,
        }
    }
}

impl From<&SyncServiceConfig> for SyncConfig {
    fn from(config: &SyncServiceConfig) -> Self {
        Self {
            default_depth: DepthPolicy::FixedCount(config.default_video_depth),
            onboarding_depth: DepthPolicy::FixedCount(config.onboarding_video_depth),
            page_size: config.page_size,
            execution_ceiling: config.execution_ceiling,
            takeover_after: config.takeover_after,
            quota_daily_limit: config.quota_daily_limit,
            quota_reset_offset_minutes: config.quota_reset_offset_minutes,
        }
    }
}

/// Collaborators the orchestrator does not own.
#[derive(Clone)]
pub struct SyncDependencies {
    pub pool: SqlitePool,
    pub source: Arc<dyn VideoSource>,
    pub tokens: Arc<dyn TokenProvider>,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

/// Which channels a video sync visits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    All,
    Group(String),
    /// Channels that belong to at least one group
    GroupedOnly,
    Tier(PriorityTier),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub trigger: SyncTrigger,
    /// Overrides `now + execution_ceiling`
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            trigger: SyncTrigger::Videos,
            deadline: None,
        }
    }
}

/// Returned to the caller that triggered a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunResult {
    pub videos_imported: u64,
    pub channels_imported: u32,
    /// The user already had videos before this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_refresh: Option<bool>,
    /// Videos added by a refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_videos: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingPlan {
    #[serde(default)]
    pub groups: Vec<GroupPlan>,
}

/// A group to create during onboarding, by platform channel id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPlan {
    pub name: String,
    #[serde(default)]
    pub channel_ids: Vec<String>,
}

impl OnboardingPlan {
    pub fn validate(&self, user_id: &str) -> Result<()> {
        for group in &self.groups {
            Group::new(user_id, group.name.clone(), 0)
                .validate()
                .map_err(|message| SyncError::InvalidInput {
                    field: "groups.name".to_string(),
                    message,
                })?;

            if group.channel_ids.iter().any(|id| id.trim().is_empty()) {
                return Err(SyncError::InvalidInput {
                    field: "groups.channelIds".to_string(),
                    message: format!("group '{}' lists an empty channel id", group.name),
                });
            }
        }
        Ok(())
    }
}

/// State of the run in flight.
struct Run {
    user_id: String,
    progress: SyncProgress,
    token: CancellationToken,
    /// Unix milliseconds
    deadline: i64,
    access_token: Option<String>,
}

#[derive(Debug, Default)]
struct ImportPass {
    channels_imported: u32,
    quota_exhausted: bool,
}

#[derive(Debug, Default)]
struct VideoPass {
    videos_imported: u64,
    stop_message: Option<String>,
}

#[derive(Debug, Default)]
struct ChannelOutcome {
    videos_added: u64,
    videos_read: usize,
    quota_exhausted: bool,
}

impl ChannelOutcome {
    fn reached_uploads(&self) -> bool {
        !self.quota_exhausted || self.videos_read > 0
    }
}

/// Sync orchestrator
pub struct SyncOrchestrator {
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
    source: Arc<dyn VideoSource>,
    tokens: Arc<dyn TokenProvider>,
    channels: Arc<dyn ChannelRepository>,
    videos: Arc<dyn VideoRepository>,
    groups: Arc<dyn GroupRepository>,
    sync_states: Arc<dyn SyncStateRepository>,
    progress: Arc<dyn SyncProgressRepository>,
    quota: Arc<dyn QuotaLedger>,
    purge: Arc<dyn LibraryPurge>,
    fetcher: Arc<ChannelFetcher>,
    cancellation: Arc<CancellationRegistry>,
    rollback: Arc<RollbackCoordinator>,
}

impl SyncOrchestrator {
    /// Create an orchestrator backed by the SQLite catalog in `deps.pool`.
    ///
    /// # Errors
    ///
    /// Returns an error if the quota reset offset is invalid.
    pub fn new(config: SyncConfig, deps: SyncDependencies) -> Result<Self> {
        let quota: Arc<dyn QuotaLedger> = Arc::new(
            SqliteQuotaLedger::new(
                deps.pool.clone(),
                deps.clock.clone(),
                config.quota_daily_limit,
                config.quota_reset_offset_minutes,
            )?
            .with_events(deps.events.clone()),
        );
        let purge: Arc<dyn LibraryPurge> = Arc::new(SqliteLibraryPurge::new(deps.pool.clone()));

        Ok(Self {
            fetcher: Arc::new(ChannelFetcher::new(
                deps.source.clone(),
                quota.clone(),
                config.page_size,
            )),
            cancellation: Arc::new(CancellationRegistry::new(
                deps.pool.clone(),
                deps.clock.clone(),
            )),
            rollback: Arc::new(RollbackCoordinator::new(purge.clone(), deps.events.clone())),
            channels: Arc::new(SqliteChannelRepository::new(deps.pool.clone())),
            videos: Arc::new(SqliteVideoRepository::new(deps.pool.clone())),
            groups: Arc::new(SqliteGroupRepository::new(deps.pool.clone())),
            sync_states: Arc::new(SqliteSyncStateRepository::new(deps.pool.clone())),
            progress: Arc::new(SqliteSyncProgressRepository::new(deps.pool)),
            config,
            clock: deps.clock,
            events: deps.events,
            source: deps.source,
            tokens: deps.tokens,
            quota,
            purge,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn quota(&self) -> Arc<dyn QuotaLedger> {
        self.quota.clone()
    }

    pub fn purge(&self) -> Arc<dyn LibraryPurge> {
        self.purge.clone()
    }

    pub fn channels(&self) -> Arc<dyn ChannelRepository> {
        self.channels.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    // ------------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------------

    /// Mirror the user's platform subscriptions into the catalog.
    pub async fn import_subscriptions(&self, user: &UserId) -> Result<SyncRunResult> {
        let task = self.clone_for_task();
        let user = user.clone();
        detached(async move { task.run_import(&user).await }).await
    }

    /// Sync uploads for the channels in `scope`.
    pub async fn sync_videos(&self, user: &UserId, scope: SyncScope) -> Result<SyncRunResult> {
        self.sync_videos_with(user, scope, RunOptions::default())
            .await
    }

    pub async fn sync_videos_with(
        &self,
        user: &UserId,
        scope: SyncScope,
        options: RunOptions,
    ) -> Result<SyncRunResult> {
        let task = self.clone_for_task();
        let user = user.clone();
        detached(async move { task.run_videos(&user, scope, options).await }).await
    }

    /// First-time setup: subscriptions, groups and a shallow video sync.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidInput`] for a malformed plan, before anything runs
    /// - [`SyncError::SyncInProgress`] when another run holds the slot
    /// - [`SyncError::Cancelled`] when cancelled; nothing is rolled back
    /// - [`SyncError::OnboardingFailed`] for anything else, after rollback
    pub async fn onboard(&self, user: &UserId, plan: OnboardingPlan) -> Result<SyncRunResult> {
        plan.validate(user.as_str())?;

        let task = self.clone_for_task();
        let user = user.clone();
        detached(async move { task.run_onboarding(&user, plan).await }).await
    }

    /// Ask the user's run to stop at the next channel boundary.
    ///
    /// Returns `true` when a run in this process was signalled directly.
    pub async fn cancel(&self, user: &UserId) -> Result<bool> {
        self.cancellation.request(user.as_str()).await
    }

    /// Latest progress snapshot.
    pub async fn progress(&self, user: &UserId) -> Result<Option<SyncProgress>> {
        self.progress.find(user.as_str()).await
    }

    /// A run holds the slot and has written within the takeover window.
    pub async fn is_sync_active(&self, user: &UserId) -> Result<bool> {
        let now = self.now();
        Ok(match self.progress.find(user.as_str()).await? {
            Some(progress) => {
                !progress.is_terminal() && !progress.is_stale(now, self.takeover_millis())
            }
            None => false,
        })
    }

    /// Handle sharing every collaborator, for the task that drives a run.
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            clock: self.clock.clone(),
            events: self.events.clone(),
            source: self.source.clone(),
            tokens: self.tokens.clone(),
            channels: self.channels.clone(),
            videos: self.videos.clone(),
            groups: self.groups.clone(),
            sync_states: self.sync_states.clone(),
            progress: self.progress.clone(),
            quota: self.quota.clone(),
            purge: self.purge.clone(),
            fetcher: self.fetcher.clone(),
            cancellation: self.cancellation.clone(),
            rollback: self.rollback.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------------

    #[instrument(skip(self), fields(user_id = %user))]
    async fn run_import(&self, user: &UserId) -> Result<SyncRunResult> {
        let mut run = self.begin(user, SyncTrigger::Subscriptions, None).await?;

        let body = self.bounded(self.subscriptions_body(&mut run)).await;
        let pass = match body {
            Ok(pass) => pass,
            Err(e) => return self.fail_run(&mut run, e).await,
        };

        let message = if pass.quota_exhausted {
            Some(format!(
                "Daily quota exhausted after importing {} channels",
                pass.channels_imported
            ))
        } else {
            Some(format!("Imported {} channels", pass.channels_imported))
        };
        self.complete_run(&mut run, message, 0).await?;

        Ok(SyncRunResult {
            channels_imported: pass.channels_imported,
            ..SyncRunResult::default()
        })
    }

    #[instrument(skip(self), fields(user_id = %user))]
    async fn run_videos(
        &self,
        user: &UserId,
        scope: SyncScope,
        options: RunOptions,
    ) -> Result<SyncRunResult> {
        let mut run = self.begin(user, options.trigger, options.deadline).await?;

        let body = self.bounded(self.videos_body(&mut run, &scope)).await;
        let (had_videos, pass) = match body {
            Ok(result) => result,
            Err(e) => return self.fail_run(&mut run, e).await,
        };

        let message = pass.stop_message.or_else(|| failure_message(&run.progress));
        self.complete_run(&mut run, message, pass.videos_imported)
            .await?;

        Ok(SyncRunResult {
            videos_imported: pass.videos_imported,
            channels_imported: 0,
            is_refresh: Some(had_videos),
            new_videos: had_videos.then_some(pass.videos_imported),
        })
    }

    #[instrument(skip(self, plan), fields(user_id = %user, groups = plan.groups.len()))]
    async fn run_onboarding(&self, user: &UserId, plan: OnboardingPlan) -> Result<SyncRunResult> {
        let mut run = self.begin(user, SyncTrigger::Onboarding, None).await?;

        let body = self.bounded(self.onboarding_body(&mut run, &plan)).await;
        let (import, pass) = match body {
            Ok(result) => result,
            Err(SyncError::Cancelled) => return self.fail_run(&mut run, SyncError::Cancelled).await,
            Err(e) => {
                self.record_failure(&mut run, &e).await;
                return Err(self.rollback.rollback(user.as_str(), e).await);
            }
        };

        let message = pass.stop_message.or_else(|| failure_message(&run.progress));
        self.complete_run(&mut run, message, pass.videos_imported)
            .await?;

        Ok(SyncRunResult {
            videos_imported: pass.videos_imported,
            channels_imported: import.channels_imported,
            is_refresh: None,
            new_videos: None,
        })
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    async fn begin(
        &self,
        user: &UserId,
        trigger: SyncTrigger,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<Run> {
        let now = self.now();
        let progress = SyncProgress::start(user.as_str(), trigger, now);

        let claimed = self
            .progress
            .try_begin(&progress, now - self.takeover_millis())
            .await?;
        if !claimed {
            info!(user_id = %user, %trigger, "Sync already in progress");
            return Err(SyncError::SyncInProgress {
                user_id: user.to_string(),
            });
        }

        let token = self.cancellation.register(user.as_str()).await?;
        let ceiling = i64::try_from(self.config.execution_ceiling.as_millis()).unwrap_or(i64::MAX);
        let deadline = deadline
            .map(|d| d.timestamp_millis())
            .unwrap_or_else(|| now.saturating_add(ceiling));

        info!(user_id = %user, run_id = %progress.run_id, %trigger, "Sync started");
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Started {
                user_id: user.to_string(),
                run_id: progress.run_id.clone(),
                trigger: trigger.to_string(),
            }))
            .ok();

        Ok(Run {
            user_id: user.to_string(),
            progress,
            token,
            deadline,
            access_token: None,
        })
    }

    async fn bounded<T>(&self, body: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.takeover_after, body).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(self.config.takeover_after.as_secs())),
        }
    }

    /// Persist the snapshot and publish it.
    async fn checkpoint(&self, run: &mut Run) -> Result<()> {
        run.progress.touch(self.now());
        self.progress.save(&run.progress).await?;

        let p = &run.progress;
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Progress {
                user_id: p.user_id.clone(),
                run_id: p.run_id.clone(),
                phase: p.phase.to_string(),
                current: p.current,
                total: p.total,
                current_item: p.current_item.clone(),
                updated_at: p.updated_at,
            }))
            .ok();
        Ok(())
    }

    async fn advance(&self, run: &mut Run, phase: SyncPhase) -> Result<()> {
        run.progress.advance(phase, self.now())?;
        self.checkpoint(run).await
    }

    async fn complete_run(
        &self,
        run: &mut Run,
        message: Option<String>,
        videos_imported: u64,
    ) -> Result<()> {
        let now = self.now();
        let result = match run.progress.complete(message, now) {
            Ok(()) => self.checkpoint(run).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            return self.fail_run(run, e).await;
        }

        let p = &run.progress;
        info!(
            user_id = %p.user_id,
            run_id = %p.run_id,
            videos_imported,
            channels_processed = p.stats.channels_processed,
            channels_failed = p.stats.channels_failed,
            "Sync completed"
        );
        self.events
            .emit(CoreEvent::Sync(SyncEvent::Completed {
                user_id: p.user_id.clone(),
                run_id: p.run_id.clone(),
                videos_imported,
                channels_processed: p.stats.channels_processed,
                channels_failed: p.stats.channels_failed,
                duration_ms: now.saturating_sub(p.started_at).max(0) as u64,
            }))
            .ok();

        self.release(run).await;
        Ok(())
    }

    /// Mark the run failed and hand the error back.
    async fn fail_run<T>(&self, run: &mut Run, error: SyncError) -> Result<T> {
        self.record_failure(run, &error).await;
        Err(error)
    }

    async fn record_failure(&self, run: &mut Run, error: &SyncError) {
        let cancelled = matches!(error, SyncError::Cancelled);
        let message = if cancelled {
            "cancelled".to_string()
        } else {
            error.to_string()
        };

        if !matches!(error, SyncError::Superseded { .. }) && !run.progress.is_terminal() {
            match run.progress.fail(message.clone(), self.now()) {
                Ok(()) => {
                    if let Err(e) = self.checkpoint(run).await {
                        warn!(error = %e, "Could not persist failed state");
                    }
                }
                Err(e) => warn!(error = %e, "Could not mark run failed"),
            }
        }

        let event = if cancelled {
            info!(user_id = %run.user_id, "Sync cancelled");
            SyncEvent::Cancelled {
                user_id: run.user_id.clone(),
                run_id: run.progress.run_id.clone(),
            }
        } else {
            error!(user_id = %run.user_id, error = %error, "Sync failed");
            SyncEvent::Failed {
                user_id: run.user_id.clone(),
                run_id: run.progress.run_id.clone(),
                message,
            }
        };
        self.events.emit(CoreEvent::Sync(event)).ok();

        self.release(run).await;
    }

    async fn release(&self, run: &Run) {
        if let Err(e) = self.cancellation.clear(&run.user_id).await {
            warn!(error = %e, "Could not clear cancellation state");
        }
    }

    // ------------------------------------------------------------------------
    // Run bodies
    // ------------------------------------------------------------------------

    async fn subscriptions_body(&self, run: &mut Run) -> Result<ImportPass> {
        let pass = self.import_phase(run).await?;
        self.advance(run, SyncPhase::Completing).await?;
        Ok(pass)
    }

    async fn videos_body(&self, run: &mut Run, scope: &SyncScope) -> Result<(bool, VideoPass)> {
        let channels = self.channels_in_scope(&run.user_id, scope).await?;
        let had_videos = self.videos.count_for_user(&run.user_id).await? > 0;
        let pass = self
            .video_phase(run, channels, self.config.default_depth, false)
            .await?;
        Ok((had_videos, pass))
    }

    async fn onboarding_body(
        &self,
        run: &mut Run,
        plan: &OnboardingPlan,
    ) -> Result<(ImportPass, VideoPass)> {
        let import = self.import_phase(run).await?;
        if import.quota_exhausted {
            self.advance(run, SyncPhase::Completing).await?;
            let pass = VideoPass {
                videos_imported: 0,
                stop_message: Some(format!(
                    "Daily quota exhausted after importing {} channels",
                    import.channels_imported
                )),
            };
            return Ok((import, pass));
        }

        self.create_groups(&run.user_id, plan).await?;

        let scope = if plan.groups.is_empty() {
            SyncScope::All
        } else {
            SyncScope::GroupedOnly
        };
        let channels = self.channels_in_scope(&run.user_id, &scope).await?;
        let pass = self
            .video_phase(run, channels, self.config.onboarding_depth, true)
            .await?;

        Ok((import, pass))
    }

    async fn access_token(&self, run: &mut Run) -> Result<String> {
        if let Some(token) = &run.access_token {
            return Ok(token.clone());
        }

        let user = UserId::parse(&run.user_id)?;
        let token = self.tokens.access_token(&user).await?;
        let secret = token.secret().to_string();
        run.access_token = Some(secret.clone());
        Ok(secret)
    }

    async fn check_cancelled(&self, run: &Run) -> Result<()> {
        if self
            .cancellation
            .is_cancelled(&run.user_id, &run.token)
            .await?
        {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn import_phase(&self, run: &mut Run) -> Result<ImportPass> {
        self.advance(run, SyncPhase::SyncingSubscriptions).await?;
        let access_token = self.access_token(run).await?;
        let user_id = run.user_id.clone();

        let mut pass = ImportPass::default();
        let mut page_token = None;

        loop {
            self.check_cancelled(run).await?;

            if self.quota.remaining(&user_id).await? == 0 {
                warn!(user_id = %user_id, "Quota exhausted during subscription import");
                pass.quota_exhausted = true;
                break;
            }

            let result = self
                .source
                .list_subscriptions(&access_token, page_token.take())
                .await;
            self.quota
                .charge(&user_id, self.source.call_cost(ApiCall::ListSubscriptions))
                .await?;

            let page = match result.map_err(SyncError::from) {
                Ok(page) => page,
                Err(e) if e.is_quota_exhaustion() => {
                    pass.quota_exhausted = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            let now = self.now();
            for remote in page.items {
                let channel = NewChannel {
                    external_channel_id: remote.channel_id,
                    title: remote.title,
                    thumbnail_url: remote.thumbnail_url,
                    subscribed_at: remote.subscribed_at.map(|at| at.timestamp_millis()),
                };

                match self.channels.upsert_subscription(&user_id, &channel, now).await {
                    Ok(_) => pass.channels_imported += 1,
                    Err(LibraryError::InvalidInput { message, .. }) => {
                        warn!(channel_id = %channel.external_channel_id, %message, "Skipping subscription");
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            run.progress.set_current_item(
                Some(format!("{} channels imported", pass.channels_imported)),
                now,
            );
            self.checkpoint(run).await?;

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        info!(channels = pass.channels_imported, "Subscription import finished");
        Ok(pass)
    }

    async fn create_groups(&self, user_id: &str, plan: &OnboardingPlan) -> Result<()> {
        let now = self.now();

        for group_plan in &plan.groups {
            let group = self.groups.get_or_create(user_id, &group_plan.name, now).await?;

            for external_id in &group_plan.channel_ids {
                let channel = self
                    .channels
                    .find_by_external_id(user_id, external_id)
                    .await?
                    .ok_or_else(|| SyncError::InvalidInput {
                        field: "groups.channelIds".to_string(),
                        message: format!("'{}' is not one of your subscriptions", external_id),
                    })?;
                self.groups.add_channel(&group.id, &channel.id).await?;
            }
        }
        Ok(())
    }

    async fn channels_in_scope(&self, user_id: &str, scope: &SyncScope) -> Result<Vec<Channel>> {
        let channels = match scope {
            SyncScope::All => self.channels.list_for_user(user_id).await?,
            SyncScope::GroupedOnly => self.channels.list_grouped(user_id).await?,
            SyncScope::Tier(tier) => self.channels.list_by_tier(user_id, *tier).await?,
            SyncScope::Group(group_id) => {
                if self.groups.find_by_id(user_id, group_id).await?.is_none() {
                    return Err(SyncError::NotFound {
                        entity: "Group".to_string(),
                        id: group_id.clone(),
                    });
                }
                self.channels.list_in_group(user_id, group_id).await?
            }
        };
        Ok(channels)
    }

    /// Visit `channels` in order. `strict` turns any channel error into a
    /// run failure.
    async fn video_phase(
        &self,
        run: &mut Run,
        channels: Vec<Channel>,
        fallback_depth: DepthPolicy,
        strict: bool,
    ) -> Result<VideoPass> {
        let total = channels.len() as u32;
        run.progress.set_total(total, self.now());
        self.checkpoint(run).await?;
        self.advance(run, SyncPhase::SyncingVideos).await?;

        let access_token = if channels.is_empty() {
            String::new()
        } else {
            self.access_token(run).await?
        };
        let mut pass = VideoPass::default();

        for channel in channels {
            self.check_cancelled(run).await?;

            let done = run.progress.current;
            if self.quota.remaining(&run.user_id).await? == 0 {
                warn!(user_id = %run.user_id, done, total, "Quota exhausted, stopping early");
                pass.stop_message = Some(format!(
                    "Daily quota exhausted; synced {} of {} channels",
                    done, total
                ));
                break;
            }

            if self.now() >= run.deadline {
                warn!(user_id = %run.user_id, done, total, "Time budget reached, stopping early");
                pass.stop_message = Some(format!(
                    "Time budget reached; synced {} of {} channels",
                    done, total
                ));
                break;
            }

            run.progress
                .set_current_item(Some(channel.title.clone()), self.now());
            self.checkpoint(run).await?;

            let outcome = self
                .sync_channel(&run.user_id, &access_token, &channel, fallback_depth)
                .await;
            let now = self.now();

            let mut stop = false;
            match outcome {
                Ok(outcome) => {
                    pass.videos_imported += outcome.videos_added;
                    // Not counted when quota stopped it before any upload was read
                    if outcome.reached_uploads() {
                        run.progress
                            .record_channel_success(outcome.videos_added, now);
                    }
                    if outcome.quota_exhausted {
                        pass.stop_message = Some(format!(
                            "Daily quota exhausted; synced {} of {} channels",
                            run.progress.current, total
                        ));
                        stop = true;
                    }
                }
                Err(e) if strict || e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(channel = %channel.title, error = %e, "Channel sync failed");
                    self.events
                        .emit(CoreEvent::Sync(SyncEvent::ChannelFailed {
                            user_id: run.user_id.clone(),
                            channel_id: channel.external_channel_id.clone(),
                            reason: e.to_string(),
                        }))
                        .ok();
                    run.progress.record_channel_failure(
                        ChannelError {
                            channel_id: channel.external_channel_id.clone(),
                            channel_name: channel.title.clone(),
                            reason: e.to_string(),
                        },
                        now,
                    );
                }
            }

            self.checkpoint(run).await?;
            if stop {
                break;
            }
        }

        self.advance(run, SyncPhase::Completing).await?;
        Ok(pass)
    }

    async fn sync_channel(
        &self,
        user_id: &str,
        access_token: &str,
        channel: &Channel,
        fallback_depth: DepthPolicy,
    ) -> Result<ChannelOutcome> {
        let policy = channel.depth_policy()?.unwrap_or(fallback_depth);
        let now = self.now();

        let mut state = self
            .sync_states
            .get(user_id, &channel.id)
            .await?
            .unwrap_or_else(|| ChannelSyncState::new(user_id, &channel.id, now));

        // First NewOnly sync only records where "new" starts
        if policy == DepthPolicy::NewOnly && state.is_never_synced() {
            state.last_synced_at = Some(now);
            state.updated_at = now;
            self.sync_states.save(&state).await?;
            return Ok(ChannelOutcome::default());
        }

        let cached = state.uploads_collection_id.is_some();
        let uploads_id = match self
            .fetcher
            .resolve_uploads_id(user_id, access_token, &channel.external_channel_id, &mut state)
            .await
        {
            Ok(id) => id,
            Err(e) if e.is_quota_exhaustion() => {
                return Ok(ChannelOutcome {
                    quota_exhausted: true,
                    ..ChannelOutcome::default()
                })
            }
            Err(e) => return Err(e),
        };
        if !cached {
            state.updated_at = now;
            self.sync_states.save(&state).await?;
        }

        let request = FetchRequest::new(user_id, access_token, uploads_id, policy, &state);
        let mut stream = self.fetcher.fetch_new_videos(request);
        let mut fetched: Vec<RemoteVideo> = Vec::new();
        let mut quota_exhausted = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(video) => fetched.push(video),
                Err(e) if e.is_quota_exhaustion() => {
                    quota_exhausted = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let newest_id = fetched.first().map(|v| v.video_id.clone());
        let batch: Vec<NewVideo> = fetched.into_iter().map(to_new_video).collect();
        let videos_added = self
            .videos
            .upsert_many(user_id, &channel.id, &batch, now)
            .await?;

        // A partial NewOnly read must not move the boundary past unread videos
        if !quota_exhausted {
            state.last_synced_at = Some(now);
            if newest_id.is_some() {
                state.last_synced_video_id = newest_id;
            }
        }
        state.updated_at = now;
        self.sync_states.save(&state).await?;

        info!(
            channel = %channel.title,
            %policy,
            fetched = batch.len(),
            videos_added,
            "Channel synced"
        );

        Ok(ChannelOutcome {
            videos_added,
            videos_read: batch.len(),
            quota_exhausted,
        })
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn takeover_millis(&self) -> i64 {
        i64::try_from(self.config.takeover_after.as_millis()).unwrap_or(i64::MAX)
    }
}

/// Drive a run on its own task so it reaches a terminal state even when the
/// caller is dropped.
async fn detached<T>(run: impl Future<Output = Result<T>> + Send + 'static) -> Result<T>
where
    T: Send + 'static,
{
    match tokio::spawn(run).await {
        Ok(result) => result,
        Err(e) => Err(SyncError::TaskFailed(e.to_string())),
    }
}

fn to_new_video(video: RemoteVideo) -> NewVideo {
    NewVideo {
        external_video_id: video.video_id,
        title: video.title,
        description: video.description,
        thumbnail_url: video.thumbnail_url,
        published_at: video.published_at.timestamp_millis(),
    }
}

fn failure_message(progress: &SyncProgress) -> Option<String> {
    progress.error_summary().map(|names| {
        format!(
            "{} of {} channels failed: {}",
            progress.stats.channels_failed, progress.total, names
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_service_config() {
        let service = SyncServiceConfig::builder()
            .database_path("/tmp/catalog.db")
            .cron_secret("secret")
            .default_video_depth(25)
            .onboarding_video_depth(5)
            .build()
            .unwrap();

        let config = SyncConfig::from(&service);
        assert_eq!(config.default_depth, DepthPolicy::FixedCount(25));
        assert_eq!(config.onboarding_depth, DepthPolicy::FixedCount(5));
        assert_eq!(config.takeover_after, service.takeover_after);
    }

    #[test]
    fn test_onboarding_plan_validation() {
        let plan: OnboardingPlan = serde_json::from_str(
            r#"{"groups":[{"name":"Tech","channelIds":["UC1","UC2"]}]}"#,
        )
        .unwrap();
        assert!(plan.validate("u1").is_ok());

        let blank = OnboardingPlan {
            groups: vec![GroupPlan {
                name: "  ".to_string(),
                channel_ids: vec![],
            }],
        };
        assert!(matches!(
            blank.validate("u1"),
            Err(SyncError::InvalidInput { .. })
        ));

        let empty_id = OnboardingPlan {
            groups: vec![GroupPlan {
                name: "Music".to_string(),
                channel_ids: vec![" ".to_string()],
            }],
        };
        assert!(empty_id.validate("u1").is_err());

        let none: OnboardingPlan = serde_json::from_str("{}").unwrap();
        assert!(none.groups.is_empty());
    }

    #[test]
    fn test_run_result_omits_absent_fields() {
        let result = SyncRunResult {
            videos_imported: 4,
            channels_imported: 0,
            is_refresh: Some(true),
            new_videos: Some(4),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isRefresh"], true);
        assert_eq!(json["newVideos"], 4);

        let json = serde_json::to_value(SyncRunResult::default()).unwrap();
        assert!(json.get("isRefresh").is_none());
        assert_eq!(json["channelsImported"], 0);
    }
}
