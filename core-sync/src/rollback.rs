//! # Onboarding Rollback
//!
//! When onboarding fails after subscriptions were imported, the user's
//! catalog is returned to empty so the next attempt starts clean. All
//! deletes run in one transaction through [`LibraryPurge::purge_user`].

use crate::SyncError;
use core_library::LibraryPurge;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tracing::{error, info, instrument};

pub struct RollbackCoordinator {
    purge: Arc<dyn LibraryPurge>,
    events: EventBus,
}

impl RollbackCoordinator {
    pub fn new(purge: Arc<dyn LibraryPurge>, events: EventBus) -> Self {
        Self { purge, events }
    }

    /// Purge the user's catalog and wrap `cause` for the caller.
    ///
    /// The returned error always carries the original cause. `rolled_back`
    /// is `false` only if the purge itself failed.
    #[instrument(skip(self, cause), fields(cause = %cause))]
    pub async fn rollback(&self, user_id: &str, cause: SyncError) -> SyncError {
        let rolled_back = match self.purge.purge_user(user_id).await {
            Ok(report) => {
                info!(rows = report.total(), "Rolled back onboarding");
                self.events
                    .emit(CoreEvent::Sync(SyncEvent::RolledBack {
                        user_id: user_id.to_string(),
                        message: cause.to_string(),
                    }))
                    .ok();
                true
            }
            Err(e) => {
                error!(error = %e, "Onboarding rollback failed; catalog may be partial");
                false
            }
        };

        SyncError::OnboardingFailed {
            cause: Box::new(cause),
            rolled_back,
        }
    }
}
