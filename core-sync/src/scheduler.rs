//! # Scheduled Refresh
//!
//! Entry point for the cron caller. After the shared secret checks out, the
//! users owning channels in one priority tier are refreshed one after
//! another until the execution ceiling runs out.

use crate::{
    orchestrator::{RunOptions, SyncOrchestrator, SyncScope},
    progress::SyncTrigger,
    Result, SyncError,
};
use bridge_traits::time::Clock;
use chrono::Duration as ChronoDuration;
use core_auth::{CronAuthenticator, UserId};
use core_library::PriorityTier;
use core_runtime::events::{CoreEvent, CronEvent, EventBus};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Outcome of one scheduled pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronRunSummary {
    pub tier: String,
    pub users_considered: u32,
    pub users_synced: u32,
    /// Users with a run already in flight
    pub users_skipped: u32,
    pub users_failed: u32,
    pub videos_imported: u64,
    pub deadline_reached: bool,
}

pub struct ScheduledTrigger {
    orchestrator: Arc<SyncOrchestrator>,
    authenticator: CronAuthenticator,
    secret: String,
    ceiling: Duration,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl ScheduledTrigger {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        authenticator: CronAuthenticator,
        secret: impl Into<String>,
        events: EventBus,
    ) -> Self {
        let ceiling = orchestrator.config().execution_ceiling;
        let clock = orchestrator.clock();
        Self {
            orchestrator,
            authenticator,
            secret: secret.into(),
            ceiling,
            clock,
            events,
        }
    }

    /// Authenticate the caller and refresh every user with channels in `tier`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::CronRateLimited`] for a bad secret after repeated failures
    /// - [`SyncError::CronUnauthorized`] for any other bad or missing secret
    /// - Catalog errors while listing users
    ///
    /// Per-user failures are counted in the summary, never returned.
    #[instrument(skip(self, provided), fields(tier = %tier))]
    pub async fn refresh(&self, provided: Option<&str>, tier: PriorityTier) -> Result<CronRunSummary> {
        let outcome = self.authenticator.validate(provided, &self.secret).await;
        if !outcome.valid {
            self.events
                .emit(CoreEvent::Cron(CronEvent::AuthRejected {
                    rate_limited: outcome.rate_limited,
                }))
                .ok();
            return Err(if outcome.rate_limited {
                SyncError::CronRateLimited
            } else {
                SyncError::CronUnauthorized
            });
        }

        let started = self.clock.now();
        let deadline = started
            + ChronoDuration::from_std(self.ceiling).unwrap_or_else(|_| ChronoDuration::minutes(5));

        let users = self.orchestrator.channels().users_with_tier(tier).await?;
        let mut summary = CronRunSummary {
            tier: tier.as_str().to_string(),
            users_considered: users.len() as u32,
            ..CronRunSummary::default()
        };

        info!(users = users.len(), "Scheduled refresh started");

        for raw in users {
            if self.clock.now() >= deadline {
                warn!(
                    synced = summary.users_synced,
                    remaining = summary.users_considered
                        - summary.users_synced
                        - summary.users_skipped
                        - summary.users_failed,
                    "Execution ceiling reached"
                );
                summary.deadline_reached = true;
                break;
            }

            let user = match UserId::parse(&raw) {
                Ok(user) => user,
                Err(e) => {
                    warn!(user_id = %raw, error = %e, "Skipping malformed user id");
                    summary.users_failed += 1;
                    continue;
                }
            };

            let options = RunOptions {
                trigger: SyncTrigger::Cron,
                deadline: Some(deadline),
            };
            match self
                .orchestrator
                .sync_videos_with(&user, SyncScope::Tier(tier), options)
                .await
            {
                Ok(result) => {
                    summary.users_synced += 1;
                    summary.videos_imported += result.videos_imported;
                }
                Err(SyncError::SyncInProgress { .. }) => {
                    info!(user_id = %user, "Run already active, skipping");
                    summary.users_skipped += 1;
                }
                Err(e) => {
                    warn!(user_id = %user, error = %e, "Scheduled sync failed");
                    summary.users_failed += 1;
                }
            }
        }

        info!(
            synced = summary.users_synced,
            skipped = summary.users_skipped,
            failed = summary.users_failed,
            videos = summary.videos_imported,
            deadline_reached = summary.deadline_reached,
            "Scheduled refresh finished"
        );
        self.events
            .emit(CoreEvent::Cron(CronEvent::RunFinished {
                tier: summary.tier.clone(),
                users_synced: summary.users_synced,
                users_skipped: summary.users_skipped,
                users_failed: summary.users_failed,
                deadline_reached: summary.deadline_reached,
            }))
            .ok();

        Ok(summary)
    }
}
