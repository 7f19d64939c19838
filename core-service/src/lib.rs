//! Core service façade and HTTP server.
//!
//! This crate wires the platform connector, token store and catalog into the
//! sync engine and exposes it through an axum router. A deployment usually
//! calls [`CoreService::from_config`]; tests assemble a service from explicit
//! [`SyncDependencies`] with [`CoreService::new`].

pub mod context;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;

pub use error::{ApiError, CoreError};
pub use router::sync_router;
pub use state::{AppState, ServerConfig};

use std::sync::Arc;

use axum::Router;
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::time::{Clock, SystemClock};
use core_auth::{CronAuthenticator, SqliteTokenStore};
use core_library::{create_pool, DatabaseConfig};
use core_runtime::config::SyncServiceConfig;
use core_runtime::events::EventBus;
use core_sync::{ScheduledTrigger, SyncConfig, SyncDependencies, SyncOrchestrator};
use provider_youtube::YouTubeConnector;
use tracing::info;

/// Primary façade exposed to the server binary.
#[derive(Clone)]
pub struct CoreService {
    state: AppState,
    events: EventBus,
}

impl CoreService {
    /// Assemble the service from explicit dependencies.
    pub fn new(config: &SyncServiceConfig, deps: SyncDependencies) -> Result<Self, CoreError> {
        let events = deps.events.clone();
        let clock = deps.clock.clone();

        let orchestrator = Arc::new(SyncOrchestrator::new(SyncConfig::from(config), deps)?);
        let authenticator = CronAuthenticator::new(
            config.cron_failure_limit,
            config.cron_failure_window,
            clock,
        );
        let scheduler = Arc::new(ScheduledTrigger::new(
            orchestrator.clone(),
            authenticator,
            config.cron_secret.clone(),
            events.clone(),
        ));

        let state =
            AppState::new(orchestrator, scheduler).with_config(ServerConfig::from(config));
        Ok(Self { state, events })
    }

    /// Production wiring: SQLite catalog, reqwest client, YouTube connector
    /// and the stored OAuth tokens.
    pub async fn from_config(config: &SyncServiceConfig) -> Result<Self, CoreError> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http = Arc::new(ReqwestHttpClient::new()?);
        let source = Arc::new(YouTubeConnector::new(http, config.api_base_url.clone()));
        let tokens = Arc::new(SqliteTokenStore::new(pool.clone(), clock.clone()));

        info!(
            database = %config.database_path.display(),
            api = %config.api_base_url,
            "Core service initialized"
        );

        Self::new(
            config,
            SyncDependencies {
                pool,
                source,
                tokens,
                clock,
                events: EventBus::new(config.event_buffer_size),
            },
        )
    }

    pub fn router(&self) -> Router {
        sync_router(self.state.clone())
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }
}
