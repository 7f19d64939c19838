//! Shared state for HTTP handlers.

use std::sync::Arc;
use std::time::Duration;

use core_runtime::config::SyncServiceConfig;
use core_sync::{ScheduledTrigger, SyncOrchestrator};

/// Server-side settings the handlers and layers need.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub request_timeout: Option<Duration>,
    pub concurrency_limit: Option<usize>,
    /// Progress untouched this long is reported as stale
    pub stale_after: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            concurrency_limit: None,
            stale_after: Duration::from_secs(30),
        }
    }
}

impl From<&SyncServiceConfig> for ServerConfig {
    fn from(config: &SyncServiceConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            concurrency_limit: config.concurrency_limit,
            stale_after: config.stale_after,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub scheduler: Arc<ScheduledTrigger>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, scheduler: Arc<ScheduledTrigger>) -> Self {
        Self {
            orchestrator,
            scheduler,
            config: ServerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn stale_after_millis(&self) -> i64 {
        i64::try_from(self.config.stale_after.as_millis()).unwrap_or(i64::MAX)
    }
}
