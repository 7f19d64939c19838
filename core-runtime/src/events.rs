//! # Event Bus System
//!
//! Typed broadcast events published by the sync engine using
//! `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: one enum per domain, wrapped by [`CoreEvent`]
//! - **EventBus**: central broadcast channel for publishing events
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Orchestrator ├──────────────>│           │     subscribe    ┌──────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│ Event logger │
//! ┌──────────────┐     emit      │ (broadcast│                  └──────────────┘
//! │ Cron trigger ├──────────────>│  channel) │
//! └──────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!         user_id: "user-1".to_string(),
//!         run_id: "run-1".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! Emitting with no subscribers returns an error. Publishers ignore it with
//! `.ok()` since events are informational.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError};

pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync run lifecycle
    Sync(SyncEvent),
    /// Quota ledger notifications
    Quota(QuotaEvent),
    /// Scheduled trigger activity
    Cron(CronEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Quota(e) => e.description(),
            CoreEvent::Cron(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::RolledBack { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::ChannelFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Quota(QuotaEvent::Exhausted { .. }) => EventSeverity::Warning,
            CoreEvent::Cron(CronEvent::AuthRejected { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Progress { .. }) => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }

    /// User the event concerns, when it concerns one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            CoreEvent::Sync(SyncEvent::Started { user_id, .. })
            | CoreEvent::Sync(SyncEvent::Progress { user_id, .. })
            | CoreEvent::Sync(SyncEvent::ChannelFailed { user_id, .. })
            | CoreEvent::Sync(SyncEvent::Completed { user_id, .. })
            | CoreEvent::Sync(SyncEvent::Failed { user_id, .. })
            | CoreEvent::Sync(SyncEvent::Cancelled { user_id, .. })
            | CoreEvent::Sync(SyncEvent::RolledBack { user_id, .. })
            | CoreEvent::Quota(QuotaEvent::Exhausted { user_id, .. }) => Some(user_id),
            CoreEvent::Cron(_) => None,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted over the life of one sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A run claimed the user's single-flight slot.
    Started {
        user_id: String,
        run_id: String,
        /// What started the run ("subscriptions", "videos", "onboarding", "cron").
        trigger: String,
    },
    /// A progress snapshot was persisted.
    Progress {
        user_id: String,
        run_id: String,
        phase: String,
        current: u32,
        total: u32,
        current_item: Option<String>,
        /// Unix milliseconds; never decreases within a run
        updated_at: i64,
    },
    /// One channel failed and the run moved on.
    ChannelFailed {
        user_id: String,
        channel_id: String,
        reason: String,
    },
    /// The run reached `completed`.
    Completed {
        user_id: String,
        run_id: String,
        videos_imported: u64,
        channels_processed: u32,
        channels_failed: u32,
        duration_ms: u64,
    },
    /// The run reached `failed`.
    Failed {
        user_id: String,
        run_id: String,
        message: String,
    },
    /// The run stopped at a cancellation checkpoint.
    Cancelled { user_id: String, run_id: String },
    /// Onboarding data was purged after a failure.
    RolledBack { user_id: String, message: String },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::ChannelFailed { .. } => "Channel sync failed",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
            SyncEvent::RolledBack { .. } => "Onboarding rolled back",
        }
    }
}

// ============================================================================
// Quota Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QuotaEvent {
    /// A user's daily allowance reached zero.
    Exhausted {
        user_id: String,
        units_used: u32,
        daily_limit: u32,
        /// Next reset, unix milliseconds
        reset_at: i64,
    },
}

impl QuotaEvent {
    fn description(&self) -> &str {
        match self {
            QuotaEvent::Exhausted { .. } => "Daily quota exhausted",
        }
    }
}

// ============================================================================
// Cron Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CronEvent {
    /// A scheduled call presented a bad secret.
    AuthRejected { rate_limited: bool },
    /// A scheduled refresh finished its pass over users.
    RunFinished {
        tier: String,
        users_synced: u32,
        users_skipped: u32,
        users_failed: u32,
        deadline_reached: bool,
    },
}

impl CronEvent {
    fn description(&self) -> &str {
        match self {
            CronEvent::AuthRejected { .. } => "Scheduled call rejected",
            CronEvent::RunFinished { .. } => "Scheduled refresh finished",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast bus shared by every publisher in the process.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let quota_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Quota(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
