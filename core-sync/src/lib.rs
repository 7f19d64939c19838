//! # Sync Engine
//!
//! Mirrors a user's channel subscriptions and their uploads into the local
//! catalog without overspending the platform's daily quota.
//!
//! ## Overview
//!
//! This module manages the lifecycle of sync runs, including:
//! - Importing subscriptions into the channel catalog
//! - Fetching uploads per channel under a depth policy
//! - Charging every billable call against the user's daily quota
//! - Publishing resumable progress snapshots and honoring cancellation
//! - Rolling back a failed onboarding
//!
//! ## Components
//!
//! - **Progress** (`progress`): Run phases with validated state transitions
//! - **Repository** (`repository`): Single-flight persistence of progress snapshots
//! - **Quota Ledger** (`quota`): Atomic daily unit accounting with lazy reset
//! - **Channel Fetcher** (`fetcher`): Lazy, depth-bounded upload streams
//! - **Cancellation** (`cancellation`): Cooperative stop requests
//! - **Rollback** (`rollback`): Catalog purge after a failed onboarding
//! - **Orchestrator** (`orchestrator`): Runs imports, video syncs and onboarding
//! - **Scheduler** (`scheduler`): Authenticated tier refresh for cron callers

pub mod cancellation;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod progress;
pub mod quota;
pub mod repository;
pub mod rollback;
pub mod scheduler;

pub use cancellation::CancellationRegistry;
pub use error::{Result, SyncError};
pub use fetcher::{ChannelFetcher, FetchRequest};
pub use orchestrator::{
    GroupPlan, OnboardingPlan, RunOptions, SyncConfig, SyncDependencies, SyncOrchestrator,
    SyncRunResult, SyncScope,
};
pub use progress::{ChannelError, SyncPhase, SyncProgress, SyncStats, SyncTrigger};
pub use quota::{QuotaLedger, QuotaRecord, SqliteQuotaLedger};
pub use repository::{SqliteSyncProgressRepository, SyncProgressRepository};
pub use rollback::RollbackCoordinator;
pub use scheduler::{CronRunSummary, ScheduledTrigger};
