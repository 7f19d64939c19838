//! # Sync Progress State Machine
//!
//! One [`SyncProgress`] record per user describes the run that is in flight,
//! or the last run that finished. The orchestrator mutates it once per
//! channel and persists every change; pollers only ever read it.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Starting → [SyncingSubscriptions] → SyncingVideos → Completing → Completed
//!            ↓                ↓                    ↓              ↓
//!            └────────────────┴────────────────────┴──────────────┴──→ Failed
//! ```
//!
//! `SyncingSubscriptions` is entered only by subscription imports and by
//! onboarding. A subscription import may go straight to `Completing`.
//!
//! ## Counters
//!
//! `current` and `total` count channels, never videos. `current` never
//! exceeds `total` and never moves backwards inside a run, and `updated_at`
//! never decreases.

use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Failed channels named in [`SyncProgress::error_summary`] before "+N more".
pub const ERROR_SUMMARY_LIMIT: usize = 3;

// ============================================================================
// Phase
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Starting,
    SyncingSubscriptions,
    SyncingVideos,
    Completing,
    Completed,
    Failed,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Starting => "starting",
            SyncPhase::SyncingSubscriptions => "syncing_subscriptions",
            SyncPhase::SyncingVideos => "syncing_videos",
            SyncPhase::Completing => "completing",
            SyncPhase::Completed => "completed",
            SyncPhase::Failed => "failed",
        }
    }

    /// Check that moving from `self` to `to` is allowed.
    pub fn validate_transition(&self, to: SyncPhase) -> Result<()> {
        use SyncPhase::*;

        let valid = match (*self, to) {
            (Idle, Starting) => true,

            (Starting, SyncingSubscriptions) => true,
            (Starting, SyncingVideos) => true,
            (Starting, Failed) => true,

            (SyncingSubscriptions, SyncingVideos) => true,
            (SyncingSubscriptions, Completing) => true,
            (SyncingSubscriptions, Failed) => true,

            (SyncingVideos, Completing) => true,
            (SyncingVideos, Failed) => true,

            (Completing, Completed) => true,
            (Completing, Failed) => true,

            // A new run starts from a fresh record, never from a terminal one
            (Completed, _) | (Failed, _) => false,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self, to),
            });
        }

        Ok(())
    }
}

impl FromStr for SyncPhase {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "idle" => Ok(SyncPhase::Idle),
            "starting" => Ok(SyncPhase::Starting),
            "syncing_subscriptions" => Ok(SyncPhase::SyncingSubscriptions),
            "syncing_videos" => Ok(SyncPhase::SyncingVideos),
            "completing" => Ok(SyncPhase::Completing),
            "completed" => Ok(SyncPhase::Completed),
            "failed" => Ok(SyncPhase::Failed),
            other => Err(SyncError::InvalidPhase(other.to_string())),
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Subscriptions,
    Videos,
    Onboarding,
    Cron,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Subscriptions => "subscriptions",
            SyncTrigger::Videos => "videos",
            SyncTrigger::Onboarding => "onboarding",
            SyncTrigger::Cron => "cron",
        }
    }
}

impl FromStr for SyncTrigger {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "subscriptions" => Ok(SyncTrigger::Subscriptions),
            "videos" => Ok(SyncTrigger::Videos),
            "onboarding" => Ok(SyncTrigger::Onboarding),
            "cron" => Ok(SyncTrigger::Cron),
            other => Err(SyncError::InvalidInput {
                field: "trigger".to_string(),
                message: format!("unknown trigger '{}'", other),
            }),
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub channels_processed: u32,
    pub channels_failed: u32,
    pub videos_added: u64,
}

/// A channel that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelError {
    pub channel_id: String,
    pub channel_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub user_id: String,
    pub run_id: String,
    pub trigger: SyncTrigger,
    pub phase: SyncPhase,
    pub current: u32,
    pub total: u32,
    pub current_item: Option<String>,
    pub message: Option<String>,
    pub stats: SyncStats,
    pub errors: Vec<ChannelError>,
    /// Unix milliseconds
    pub started_at: i64,
    /// Unix milliseconds
    pub updated_at: i64,
}

impl SyncProgress {
    /// A fresh record in `starting` for a new run.
    pub fn start(user_id: impl Into<String>, trigger: SyncTrigger, now: i64) -> Self {
        Self {
            user_id: user_id.into(),
            run_id: Uuid::new_v4().to_string(),
            trigger,
            phase: SyncPhase::Starting,
            current: 0,
            total: 0,
            current_item: None,
            message: None,
            stats: SyncStats::default(),
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Non-terminal but not written to for longer than `threshold_ms`.
    pub fn is_stale(&self, now: i64, threshold_ms: i64) -> bool {
        !self.is_terminal() && now.saturating_sub(self.updated_at) > threshold_ms
    }

    /// Move `updated_at` forward, never backward.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = self.updated_at.max(now);
    }

    /// Change phase after validating the transition.
    pub fn advance(&mut self, to: SyncPhase, now: i64) -> Result<()> {
        self.phase.validate_transition(to)?;
        self.phase = to;
        self.touch(now);
        Ok(())
    }

    /// Set the number of channels this run will visit.
    pub fn set_total(&mut self, total: u32, now: i64) {
        self.total = total;
        self.current = self.current.min(total);
        self.touch(now);
    }

    pub fn set_current_item(&mut self, item: Option<String>, now: i64) {
        self.current_item = item;
        self.touch(now);
    }

    pub fn set_message(&mut self, message: impl Into<String>, now: i64) {
        self.message = Some(message.into());
        self.touch(now);
    }

    pub fn record_channel_success(&mut self, videos_added: u64, now: i64) {
        self.advance_current();
        self.stats.channels_processed += 1;
        self.stats.videos_added += videos_added;
        self.touch(now);
    }

    pub fn record_channel_failure(&mut self, error: ChannelError, now: i64) {
        self.advance_current();
        self.stats.channels_failed += 1;
        self.errors.push(error);
        self.touch(now);
    }

    /// Enter `completed`, going through `completing` if needed.
    pub fn complete(&mut self, message: Option<String>, now: i64) -> Result<()> {
        if self.phase != SyncPhase::Completing {
            self.advance(SyncPhase::Completing, now)?;
        }
        self.advance(SyncPhase::Completed, now)?;
        self.current_item = None;
        if message.is_some() {
            self.message = message;
        }
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>, now: i64) -> Result<()> {
        self.advance(SyncPhase::Failed, now)?;
        self.current_item = None;
        self.message = Some(message.into());
        Ok(())
    }

    /// Names of failed channels, capped at [`ERROR_SUMMARY_LIMIT`].
    ///
    /// Returns `None` when no channel failed.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }

        let names: Vec<&str> = self
            .errors
            .iter()
            .take(ERROR_SUMMARY_LIMIT)
            .map(|e| e.channel_name.as_str())
            .collect();
        let mut summary = names.join(", ");

        let hidden = self.errors.len().saturating_sub(ERROR_SUMMARY_LIMIT);
        if hidden > 0 {
            summary.push_str(&format!(" +{} more", hidden));
        }

        Some(summary)
    }

    /// Seconds left at the average pace so far.
    ///
    /// `None` until one channel has finished, and for terminal records.
    pub fn estimated_seconds_remaining(&self, now: i64) -> Option<u64> {
        if self.is_terminal() || self.current == 0 || self.total == 0 {
            return None;
        }

        let elapsed_ms = now.saturating_sub(self.started_at).max(0) as u64;
        let per_channel_ms = elapsed_ms / self.current as u64;
        let left = self.total.saturating_sub(self.current) as u64;

        Some((per_channel_ms * left).div_ceil(1000))
    }

    fn advance_current(&mut self) {
        if self.current < self.total {
            self.current += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_error(name: &str) -> ChannelError {
        ChannelError {
            channel_id: format!("id-{}", name),
            channel_name: name.to_string(),
            reason: "boom".to_string(),
        }
    }

    #[test]
    fn test_phase_round_trip_through_text() {
        for phase in [
            SyncPhase::Idle,
            SyncPhase::Starting,
            SyncPhase::SyncingSubscriptions,
            SyncPhase::SyncingVideos,
            SyncPhase::Completing,
            SyncPhase::Completed,
            SyncPhase::Failed,
        ] {
            assert_eq!(phase.as_str().parse::<SyncPhase>().unwrap(), phase);
        }
        assert!("running".parse::<SyncPhase>().is_err());
    }

    #[test]
    fn test_valid_and_invalid_transitions() {
        assert!(SyncPhase::Starting
            .validate_transition(SyncPhase::SyncingVideos)
            .is_ok());
        assert!(SyncPhase::SyncingVideos
            .validate_transition(SyncPhase::Failed)
            .is_ok());

        let err = SyncPhase::Completed
            .validate_transition(SyncPhase::SyncingVideos)
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));

        assert!(SyncPhase::SyncingVideos
            .validate_transition(SyncPhase::SyncingSubscriptions)
            .is_err());
        assert!(SyncPhase::Starting
            .validate_transition(SyncPhase::Completed)
            .is_err());
    }

    #[test]
    fn test_counters_never_pass_total() {
        let mut progress = SyncProgress::start("u1", SyncTrigger::Videos, 1_000);
        progress.set_total(2, 1_000);
        progress.advance(SyncPhase::SyncingVideos, 1_001).unwrap();

        progress.record_channel_success(4, 1_002);
        progress.record_channel_failure(channel_error("B"), 1_003);
        progress.record_channel_success(1, 1_004);

        assert_eq!(progress.current, 2);
        assert_eq!(progress.stats.channels_processed, 2);
        assert_eq!(progress.stats.channels_failed, 1);
        assert_eq!(progress.stats.videos_added, 5);
    }

    #[test]
    fn test_updated_at_never_decreases() {
        let mut progress = SyncProgress::start("u1", SyncTrigger::Videos, 5_000);
        progress.set_total(1, 4_000);
        assert_eq!(progress.updated_at, 5_000);

        progress.advance(SyncPhase::SyncingVideos, 6_000).unwrap();
        progress.record_channel_success(0, 5_500);
        assert_eq!(progress.updated_at, 6_000);
    }

    #[test]
    fn test_complete_passes_through_completing() {
        let mut progress = SyncProgress::start("u1", SyncTrigger::Videos, 0);
        progress.advance(SyncPhase::SyncingVideos, 1).unwrap();
        progress.set_current_item(Some("A".to_string()), 2);

        progress.complete(Some("done".to_string()), 3).unwrap();

        assert_eq!(progress.phase, SyncPhase::Completed);
        assert_eq!(progress.current_item, None);
        assert_eq!(progress.message.as_deref(), Some("done"));
        assert!(progress.fail("late", 4).is_err());
    }

    #[test]
    fn test_error_summary_caps_names() {
        let mut progress = SyncProgress::start("u1", SyncTrigger::Videos, 0);
        assert_eq!(progress.error_summary(), None);

        progress.set_total(5, 0);
        for name in ["A", "B"] {
            progress.record_channel_failure(channel_error(name), 1);
        }
        assert_eq!(progress.error_summary().unwrap(), "A, B");

        for name in ["C", "D", "E"] {
            progress.record_channel_failure(channel_error(name), 1);
        }
        assert_eq!(progress.error_summary().unwrap(), "A, B, C +2 more");
    }

    #[test]
    fn test_staleness_and_eta() {
        let mut progress = SyncProgress::start("u1", SyncTrigger::Cron, 0);
        progress.set_total(4, 0);
        assert_eq!(progress.estimated_seconds_remaining(1_000), None);

        progress.record_channel_success(0, 2_000);
        // 2s per channel, 3 left
        assert_eq!(progress.estimated_seconds_remaining(2_000), Some(6));

        assert!(!progress.is_stale(10_000, 30_000));
        assert!(progress.is_stale(40_000, 30_000));

        progress.fail("cancelled", 40_000).unwrap();
        assert!(!progress.is_stale(1_000_000, 30_000));
        assert_eq!(progress.estimated_seconds_remaining(50_000), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let progress = SyncProgress::start("u1", SyncTrigger::Onboarding, 7);
        let json = serde_json::to_value(&progress).unwrap();

        assert_eq!(json["phase"], "starting");
        assert_eq!(json["trigger"], "onboarding");
        assert_eq!(json["currentItem"], serde_json::Value::Null);
        assert_eq!(json["stats"]["videosAdded"], 0);
        assert_eq!(json["updatedAt"], 7);
    }
}
