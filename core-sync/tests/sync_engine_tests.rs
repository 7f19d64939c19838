//! Integration tests for the sync engine
//!
//! These tests drive the orchestrator against an in-memory catalog and a
//! scripted video source:
//! - Full video sync with progress events
//! - Early stop on an exhausted quota
//! - Cancellation between channels
//! - Onboarding rollback
//! - Deduplication across overlapping runs
//! - Single-flight rejection
//! - Cron secret rate limiting

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    time::{Clock, ManualClock},
    video::{RemoteChannel, RemotePage, RemoteVideo, VideoSource},
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use core_auth::{CronAuthenticator, StaticTokenProvider, UserId};
use core_library::{
    create_test_pool,
    repositories::{
        ChannelRepository, GroupRepository, SqliteChannelRepository, SqliteGroupRepository,
        SqliteVideoRepository, VideoRepository,
    },
    DepthPolicy, NewChannel, PriorityTier,
};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    CancellationRegistry, GroupPlan, OnboardingPlan, ScheduledTrigger, SyncConfig,
    SyncDependencies, SyncError, SyncOrchestrator, SyncPhase, SyncProgress,
    SyncProgressRepository, SqliteSyncProgressRepository, SyncScope, SyncTrigger,
};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

const USER: &str = "user-1";
const TOKEN: &str = "access-token";

// ============================================================================
// Fake video source
// ============================================================================

/// Scripted platform: a fixed subscription list and per-channel uploads.
#[derive(Default)]
struct FakeVideoSource {
    subscriptions: Vec<RemoteChannel>,
    uploads: HashMap<String, Vec<RemoteVideo>>,
    failures: HashMap<String, BridgeError>,
    /// Request cancellation when this channel's uploads are resolved
    cancel_on: AsyncMutex<Option<(String, Arc<CancellationRegistry>)>>,
    /// Moved forward one second per uploads page
    tick: AsyncMutex<Option<Arc<ManualClock>>>,
    /// Slow platform: uploads resolution takes this long
    resolve_delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeVideoSource {
    fn with_channels(titles: &[&str], videos_per_channel: usize, base: DateTime<Utc>) -> Self {
        let mut source = FakeVideoSource::default();
        for title in titles {
            let channel_id = format!("UC{}", title);
            source.subscriptions.push(RemoteChannel {
                channel_id: channel_id.clone(),
                title: title.to_string(),
                thumbnail_url: None,
                subscribed_at: None,
            });

            let videos = (0..videos_per_channel)
                .map(|i| RemoteVideo {
                    video_id: format!("{}-v{}", title, i),
                    channel_id: channel_id.clone(),
                    title: format!("{} video {}", title, i),
                    description: None,
                    thumbnail_url: None,
                    // Newest first
                    published_at: base - ChronoDuration::hours(i as i64 + 1),
                })
                .collect();
            source.uploads.insert(channel_id, videos);
        }
        source
    }

    fn fail_channel(mut self, channel_id: &str, error: BridgeError) -> Self {
        self.failures.insert(channel_id.to_string(), error);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSource for FakeVideoSource {
    async fn list_subscriptions(
        &self,
        _access_token: &str,
        _page_token: Option<String>,
    ) -> BridgeResult<RemotePage<RemoteChannel>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RemotePage::last(self.subscriptions.clone()))
    }

    async fn uploads_collection_id(&self, _access_token: &str, channel_id: &str) -> BridgeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((target, registry)) = self.cancel_on.lock().await.as_ref() {
            if target == channel_id {
                registry.request(USER).await.ok();
            }
        }

        match self.failures.get(channel_id) {
            Some(BridgeError::Unauthorized(m)) => Err(BridgeError::Unauthorized(m.clone())),
            Some(BridgeError::QuotaExhausted(m)) => Err(BridgeError::QuotaExhausted(m.clone())),
            Some(other) => Err(BridgeError::OperationFailed(other.to_string())),
            None => Ok(format!("UU{}", channel_id)),
        }
    }

    async fn list_uploads(
        &self,
        _access_token: &str,
        uploads_id: &str,
        _page_token: Option<String>,
        page_size: u32,
    ) -> BridgeResult<RemotePage<RemoteVideo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(clock) = self.tick.lock().await.as_ref() {
            clock.advance(ChronoDuration::seconds(1));
        }
        let channel_id = uploads_id.trim_start_matches("UU");
        let videos = self.uploads.get(channel_id).cloned().unwrap_or_default();
        Ok(RemotePage::last(
            videos.into_iter().take(page_size as usize).collect(),
        ))
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    pool: SqlitePool,
    clock: Arc<ManualClock>,
    events: EventBus,
    source: Arc<FakeVideoSource>,
    orchestrator: Arc<SyncOrchestrator>,
    user: UserId,
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 18, 0, 0).unwrap()
}

async fn harness(source: FakeVideoSource, config: SyncConfig) -> Harness {
    let pool = create_test_pool().await.unwrap();
    let clock = Arc::new(ManualClock::new(base_time()));
    let events = EventBus::new(256);
    let user = UserId::parse(USER).unwrap();
    let source = Arc::new(source);

    let orchestrator = SyncOrchestrator::new(
        config,
        SyncDependencies {
            pool: pool.clone(),
            source: source.clone(),
            tokens: Arc::new(StaticTokenProvider::with_token(user.clone(), TOKEN)),
            clock: clock.clone(),
            events: events.clone(),
        },
    )
    .unwrap();

    Harness {
        pool,
        clock,
        events,
        source,
        orchestrator: Arc::new(orchestrator),
        user,
    }
}

async fn seed_channels(h: &Harness) {
    let repo = SqliteChannelRepository::new(h.pool.clone());
    for channel in &h.source.subscriptions {
        repo.upsert_subscription(
            USER,
            &NewChannel {
                external_channel_id: channel.channel_id.clone(),
                title: channel.title.clone(),
                thumbnail_url: None,
                subscribed_at: None,
            },
            h.clock.unix_timestamp_millis(),
        )
        .await
        .unwrap();
    }
}

async fn video_count(h: &Harness) -> i64 {
    SqliteVideoRepository::new(h.pool.clone())
        .count_for_user(USER)
        .await
        .unwrap()
}

async fn final_progress(h: &Harness) -> SyncProgress {
    h.orchestrator.progress(&h.user).await.unwrap().unwrap()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Sync(event) = event {
            events.push(event);
        }
    }
    events
}

// ============================================================================
// Video sync
// ============================================================================

#[tokio::test]
async fn test_video_sync_visits_every_channel_in_order() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 4, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;
    *h.source.tick.lock().await = Some(h.clock.clone());
    let mut rx = h.events.subscribe();

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 12);
    assert_eq!(result.is_refresh, Some(false));
    assert_eq!(result.new_videos, None);
    assert_eq!(video_count(&h).await, 12);

    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!(progress.trigger, SyncTrigger::Videos);
    assert_eq!((progress.current, progress.total), (3, 3));
    assert_eq!(progress.stats.channels_processed, 3);
    assert!(progress.errors.is_empty());
    assert!(progress.current_item.is_none());

    let events = drain(&mut rx);
    assert!(matches!(events.first(), Some(SyncEvent::Started { .. })));
    assert!(matches!(
        events.last(),
        Some(SyncEvent::Completed {
            videos_imported: 12,
            channels_processed: 3,
            channels_failed: 0,
            ..
        })
    ));

    let snapshots: Vec<(String, u32, u32, Option<String>, i64)> = events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Progress {
                phase,
                current,
                total,
                current_item,
                updated_at,
                ..
            } => Some((
                phase.clone(),
                *current,
                *total,
                current_item.clone(),
                *updated_at,
            )),
            _ => None,
        })
        .collect();

    let first = &snapshots[0];
    assert_eq!((first.0.as_str(), first.1, first.2), ("starting", 0, 3));
    let completing = snapshots
        .iter()
        .find(|s| s.0 == "completing")
        .expect("completing snapshot");
    assert_eq!((completing.1, completing.2), (3, 3));
    assert_eq!(snapshots.last().map(|s| s.0.as_str()), Some("completed"));

    let stamps: Vec<i64> = snapshots.iter().map(|s| s.4).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    assert!(stamps[0] < stamps[stamps.len() - 1]);

    // Each channel is announced before its fetch, then counted after it
    let visited: Vec<(u32, String)> = snapshots
        .iter()
        .filter(|s| s.0 == "syncing_videos")
        .filter_map(|s| s.3.clone().map(|item| (s.1, item)))
        .collect();
    assert_eq!(
        visited,
        vec![
            (0, "Alpha".to_string()),
            (1, "Alpha".to_string()),
            (1, "Bravo".to_string()),
            (2, "Bravo".to_string()),
            (2, "Charlie".to_string()),
            (3, "Charlie".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_second_run_deduplicates_and_reports_refresh() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 3, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();
    h.clock.advance(ChronoDuration::minutes(10));
    let second = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(second.videos_imported, 0);
    assert_eq!(second.is_refresh, Some(true));
    assert_eq!(second.new_videos, Some(0));
    assert_eq!(video_count(&h).await, 6);
}

#[tokio::test]
async fn test_depth_policy_caps_each_channel() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 8, base_time());
    let config = SyncConfig {
        default_depth: DepthPolicy::FixedCount(5),
        ..SyncConfig::default()
    };
    let h = harness(source, config).await;
    seed_channels(&h).await;

    let channels = SqliteChannelRepository::new(h.pool.clone());
    let bravo = channels.find_by_external_id(USER, "UCBravo").await.unwrap().unwrap();
    channels
        .set_depth_policy(USER, &bravo.id, Some(DepthPolicy::FixedCount(2)), 0)
        .await
        .unwrap();

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 7);
    let videos = SqliteVideoRepository::new(h.pool.clone());
    assert_eq!(videos.count_for_channel(USER, &bravo.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_new_only_first_sync_imports_nothing() {
    let source = FakeVideoSource::with_channels(&["Alpha"], 5, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let channels = SqliteChannelRepository::new(h.pool.clone());
    let alpha = channels.find_by_external_id(USER, "UCAlpha").await.unwrap().unwrap();
    channels
        .set_depth_policy(USER, &alpha.id, Some(DepthPolicy::NewOnly), 0)
        .await
        .unwrap();

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 0);
    assert_eq!(h.source.calls(), 0);
    assert_eq!(final_progress(&h).await.phase, SyncPhase::Completed);
}

#[tokio::test]
async fn test_exhausted_quota_stops_early_as_completed() {
    // Two calls per channel: resolve uploads, then one page
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 2, base_time());
    let config = SyncConfig {
        quota_daily_limit: 4,
        ..SyncConfig::default()
    };
    let h = harness(source, config).await;
    seed_channels(&h).await;

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 4);
    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!((progress.current, progress.total), (2, 3));
    assert_eq!(
        progress.message.as_deref(),
        Some("Daily quota exhausted; synced 2 of 3 channels")
    );

    let quota = h.orchestrator.quota().status(USER).await.unwrap();
    assert_eq!(quota.remaining(), 0);
}

#[tokio::test]
async fn test_upstream_quota_refusal_does_not_count_channel() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 2, base_time())
        .fail_channel("UCBravo", BridgeError::QuotaExhausted("quotaExceeded".to_string()));
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 2);
    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!((progress.current, progress.total), (1, 3));
    assert_eq!(progress.stats.channels_processed, 1);
    assert_eq!(progress.stats.channels_failed, 0);
    assert_eq!(
        progress.message.as_deref(),
        Some("Daily quota exhausted; synced 1 of 3 channels")
    );
}

#[tokio::test]
async fn test_failing_channel_is_recorded_and_run_continues() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 1, base_time())
        .fail_channel("UCBravo", BridgeError::OperationFailed("HTTP 500".to_string()));
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();

    assert_eq!(result.videos_imported, 2);
    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!(progress.stats.channels_failed, 1);
    assert_eq!(progress.errors[0].channel_name, "Bravo");
    assert!(progress.message.unwrap().contains("Bravo"));
}

#[tokio::test]
async fn test_revoked_token_fails_the_run() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 1, base_time())
        .fail_channel("UCAlpha", BridgeError::Unauthorized("revoked".to_string()));
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let error = h
        .orchestrator
        .sync_videos(&h.user, SyncScope::All)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::Unauthorized(_)));
    assert_eq!(final_progress(&h).await.phase, SyncPhase::Failed);
}

#[tokio::test]
async fn test_unknown_group_is_not_found() {
    let source = FakeVideoSource::with_channels(&["Alpha"], 1, base_time());
    let h = harness(source, SyncConfig::default()).await;

    let error = h
        .orchestrator
        .sync_videos(&h.user, SyncScope::Group("missing".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::NotFound { .. }));
}

// ============================================================================
// Cancellation and single flight
// ============================================================================

#[tokio::test]
async fn test_cancellation_stops_at_channel_boundary() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 2, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    // Another worker asks for cancellation while Bravo is being fetched
    let other = Arc::new(CancellationRegistry::new(h.pool.clone(), h.clock.clone()));
    *h.source.cancel_on.lock().await = Some(("UCBravo".to_string(), other));
    let mut rx = h.events.subscribe();

    let error = h
        .orchestrator
        .sync_videos(&h.user, SyncScope::All)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::Cancelled));
    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Failed);
    assert_eq!(progress.message.as_deref(), Some("cancelled"));
    assert_eq!(progress.current, 2);

    // Work finished before the request is kept
    assert_eq!(video_count(&h).await, 4);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SyncEvent::Cancelled { .. })));

    // The request is consumed; the next run is unaffected
    *h.source.cancel_on.lock().await = None;
    let next = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();
    assert_eq!(next.videos_imported, 2);
}

#[tokio::test]
async fn test_run_outlives_a_caller_that_stops_waiting() {
    let mut source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 2, base_time());
    source.resolve_delay = Some(Duration::from_millis(200));
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    // The caller gives up while the first channel is still resolving
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.sync_videos(&h.user, SyncScope::All),
    )
    .await;
    assert!(abandoned.is_err());

    let mut progress = None;
    for _ in 0..100 {
        progress = h.orchestrator.progress(&h.user).await.unwrap();
        if progress.as_ref().is_some_and(|p| p.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let progress = progress.unwrap();
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!((progress.current, progress.total), (2, 2));
    assert_eq!(video_count(&h).await, 4);
    assert!(!h.orchestrator.is_sync_active(&h.user).await.unwrap());

    // The slot is free again right away
    let next = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();
    assert_eq!(next.is_refresh, Some(true));
}

#[tokio::test]
async fn test_concurrent_run_is_rejected() {
    let source = FakeVideoSource::with_channels(&["Alpha"], 1, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let repo = SqliteSyncProgressRepository::new(h.pool.clone());
    let now = h.clock.unix_timestamp_millis();
    let held = SyncProgress::start(USER, SyncTrigger::Cron, now);
    assert!(repo.try_begin(&held, now - 360_000).await.unwrap());

    assert!(h.orchestrator.is_sync_active(&h.user).await.unwrap());
    let error = h
        .orchestrator
        .sync_videos(&h.user, SyncScope::All)
        .await
        .unwrap_err();
    assert!(matches!(error, SyncError::SyncInProgress { .. }));

    // An abandoned run is taken over once it goes quiet
    h.clock.advance(ChronoDuration::minutes(7));
    assert!(!h.orchestrator.is_sync_active(&h.user).await.unwrap());
    let result = h.orchestrator.sync_videos(&h.user, SyncScope::All).await.unwrap();
    assert_eq!(result.videos_imported, 1);
}

// ============================================================================
// Subscriptions and onboarding
// ============================================================================

#[tokio::test]
async fn test_import_subscriptions() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 0, base_time());
    let h = harness(source, SyncConfig::default()).await;

    let result = h.orchestrator.import_subscriptions(&h.user).await.unwrap();

    assert_eq!(result.channels_imported, 2);
    let channels = SqliteChannelRepository::new(h.pool.clone());
    assert_eq!(channels.count(USER).await.unwrap(), 2);

    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!(progress.trigger, SyncTrigger::Subscriptions);
    let quota = h.orchestrator.quota().status(USER).await.unwrap();
    assert_eq!(quota.units_used, 1);
}

#[tokio::test]
async fn test_onboarding_creates_groups_and_syncs_them() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 20, base_time());
    let h = harness(source, SyncConfig::default()).await;

    let plan = OnboardingPlan {
        groups: vec![GroupPlan {
            name: "Tech".to_string(),
            channel_ids: vec!["UCAlpha".to_string(), "UCCharlie".to_string()],
        }],
    };
    let result = h.orchestrator.onboard(&h.user, plan).await.unwrap();

    assert_eq!(result.channels_imported, 3);
    // Onboarding depth of 10 for the two grouped channels
    assert_eq!(result.videos_imported, 20);

    let groups = SqliteGroupRepository::new(h.pool.clone());
    let created = groups.list_for_user(USER).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(groups.channel_ids(&created[0].id).await.unwrap().len(), 2);

    let progress = final_progress(&h).await;
    assert_eq!(progress.phase, SyncPhase::Completed);
    assert_eq!(progress.total, 2);
}

#[tokio::test]
async fn test_onboarding_failure_rolls_back_catalog() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo", "Charlie"], 2, base_time())
        .fail_channel("UCCharlie", BridgeError::Unauthorized("revoked".to_string()));
    let h = harness(source, SyncConfig::default()).await;
    let mut rx = h.events.subscribe();

    let plan = OnboardingPlan {
        groups: vec![GroupPlan {
            name: "All".to_string(),
            channel_ids: vec![
                "UCAlpha".to_string(),
                "UCBravo".to_string(),
                "UCCharlie".to_string(),
            ],
        }],
    };
    let error = h.orchestrator.onboard(&h.user, plan).await.unwrap_err();

    match error {
        SyncError::OnboardingFailed { cause, rolled_back } => {
            assert!(rolled_back);
            assert!(matches!(*cause, SyncError::Unauthorized(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let groups = SqliteGroupRepository::new(h.pool.clone());
    assert!(groups.list_for_user(USER).await.unwrap().is_empty());
    let channels = SqliteChannelRepository::new(h.pool.clone());
    assert_eq!(channels.count(USER).await.unwrap(), 0);
    assert_eq!(video_count(&h).await, 0);

    assert_eq!(final_progress(&h).await.phase, SyncPhase::Failed);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, SyncEvent::RolledBack { .. })));
}

#[tokio::test]
async fn test_onboarding_rejects_unknown_channel() {
    let source = FakeVideoSource::with_channels(&["Alpha"], 1, base_time());
    let h = harness(source, SyncConfig::default()).await;

    let plan = OnboardingPlan {
        groups: vec![GroupPlan {
            name: "Music".to_string(),
            channel_ids: vec!["UCNobody".to_string()],
        }],
    };
    let error = h.orchestrator.onboard(&h.user, plan).await.unwrap_err();

    match error {
        SyncError::OnboardingFailed { cause, .. } => {
            assert!(matches!(*cause, SyncError::InvalidInput { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let channels = SqliteChannelRepository::new(h.pool.clone());
    assert_eq!(channels.count(USER).await.unwrap(), 0);
}

// ============================================================================
// Scheduled refresh
// ============================================================================

fn trigger(h: &Harness) -> ScheduledTrigger {
    let authenticator = CronAuthenticator::new(5, Duration::from_secs(900), h.clock.clone());
    ScheduledTrigger::new(h.orchestrator.clone(), authenticator, "cron-secret", h.events.clone())
}

#[tokio::test]
async fn test_cron_refreshes_tier_users() {
    let source = FakeVideoSource::with_channels(&["Alpha", "Bravo"], 3, base_time());
    let h = harness(source, SyncConfig::default()).await;
    seed_channels(&h).await;

    let channels = SqliteChannelRepository::new(h.pool.clone());
    let alpha = channels.find_by_external_id(USER, "UCAlpha").await.unwrap().unwrap();
    channels
        .set_priority_tier(USER, &alpha.id, PriorityTier::High, 0)
        .await
        .unwrap();

    let summary = trigger(&h)
        .refresh(Some("cron-secret"), PriorityTier::High)
        .await
        .unwrap();

    assert_eq!(summary.tier, "high");
    assert_eq!(summary.users_synced, 1);
    assert_eq!(summary.videos_imported, 3);
    assert!(!summary.deadline_reached);
    assert_eq!(final_progress(&h).await.trigger, SyncTrigger::Cron);
}

#[tokio::test]
async fn test_cron_rate_limits_repeated_bad_secrets() {
    let source = FakeVideoSource::default();
    let h = harness(source, SyncConfig::default()).await;
    let trigger = trigger(&h);

    for _ in 0..5 {
        let error = trigger.refresh(Some("wrong"), PriorityTier::High).await.unwrap_err();
        assert!(matches!(error, SyncError::CronUnauthorized));
    }

    let error = trigger.refresh(Some("wrong"), PriorityTier::High).await.unwrap_err();
    assert!(matches!(error, SyncError::CronRateLimited));

    h.clock.advance(ChronoDuration::minutes(16));
    let error = trigger.refresh(None, PriorityTier::High).await.unwrap_err();
    assert!(matches!(error, SyncError::CronUnauthorized));
}
