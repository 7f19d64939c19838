//! # Quota Ledger
//!
//! Per-user daily budget of platform API units.
//!
//! Every billable call is charged after it is issued with a single SQL
//! statement, so concurrent runs for the same user (a manual sync racing a
//! scheduled one) can never lose an update. The budget resets at the next
//! local midnight in the configured offset, which defaults to the platform's
//! Pacific reset.
//!
//! A single call cannot be split, so [`QuotaLedger::charge`] always bills and
//! may leave `units_used` above the limit. Callers that need a hard stop
//! before issuing a call use [`QuotaLedger::try_reserve`].

use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::time::Clock;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Utc};
use core_runtime::events::{CoreEvent, EventBus, QuotaEvent};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Default daily allowance of the platform API.
pub const DEFAULT_DAILY_LIMIT: u32 = 10_000;

/// Pacific Standard Time, in minutes east of UTC.
pub const DEFAULT_RESET_OFFSET_MINUTES: i32 = -8 * 60;

/// A user's usage for the current quota day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub user_id: String,
    pub units_used: u32,
    pub daily_limit: u32,
    /// Unix milliseconds of the next reset
    pub reset_at: i64,
}

impl QuotaRecord {
    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.units_used)
    }

    /// Share of the limit used, capped at 100 and rounded to one decimal.
    pub fn percent_used(&self) -> f64 {
        if self.daily_limit == 0 {
            return 100.0;
        }
        let percent = self.units_used as f64 * 100.0 / self.daily_limit as f64;
        (percent.min(100.0) * 10.0).round() / 10.0
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[derive(Debug, FromRow)]
struct QuotaRow {
    user_id: String,
    units_used: i64,
    daily_limit: i64,
    reset_at: i64,
}

impl From<QuotaRow> for QuotaRecord {
    fn from(row: QuotaRow) -> Self {
        Self {
            user_id: row.user_id,
            units_used: row.units_used.clamp(0, u32::MAX as i64) as u32,
            daily_limit: row.daily_limit.clamp(0, u32::MAX as i64) as u32,
            reset_at: row.reset_at,
        }
    }
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Units left today, never negative.
    async fn remaining(&self, user_id: &str) -> Result<u32>;

    /// Bill `units` unconditionally. Returns the updated record.
    async fn charge(&self, user_id: &str, units: u32) -> Result<QuotaRecord>;

    /// Bill `units` only if they fit in what is left.
    ///
    /// # Errors
    ///
    /// [`SyncError::QuotaExceeded`] when they do not fit; nothing is billed.
    async fn try_reserve(&self, user_id: &str, units: u32) -> Result<QuotaRecord>;

    /// Current record, with a due reset applied.
    async fn status(&self, user_id: &str) -> Result<QuotaRecord>;
}

/// First local midnight strictly after `now` at `offset`.
pub fn next_reset_after(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let next_date = local_date.succ_opt().unwrap_or(local_date);
    let midnight = next_date.and_time(NaiveTime::MIN);

    match offset.from_local_datetime(&midnight).single() {
        Some(reset) => reset.with_timezone(&Utc),
        None => now + chrono::Duration::days(1),
    }
}

pub struct SqliteQuotaLedger {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    daily_limit: u32,
    reset_offset: FixedOffset,
    events: Option<EventBus>,
}

impl SqliteQuotaLedger {
    /// # Errors
    ///
    /// [`SyncError::InvalidInput`] when `reset_offset_minutes` is not a valid
    /// UTC offset.
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        daily_limit: u32,
        reset_offset_minutes: i32,
    ) -> Result<Self> {
        let reset_offset = FixedOffset::east_opt(reset_offset_minutes * 60).ok_or_else(|| {
            SyncError::InvalidInput {
                field: "reset_offset_minutes".to_string(),
                message: format!("{} is not a valid UTC offset", reset_offset_minutes),
            }
        })?;

        Ok(Self {
            pool,
            clock,
            daily_limit,
            reset_offset,
            events: None,
        })
    }

    /// Publish [`QuotaEvent::Exhausted`] when a charge uses up the budget.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn next_reset_millis(&self) -> i64 {
        next_reset_after(self.clock.now(), self.reset_offset).timestamp_millis()
    }

    fn fresh_record(&self, user_id: &str) -> QuotaRecord {
        QuotaRecord {
            user_id: user_id.to_string(),
            units_used: 0,
            daily_limit: self.daily_limit,
            reset_at: self.next_reset_millis(),
        }
    }

    fn notify_if_crossed(&self, record: &QuotaRecord, units: u32) {
        let before = record.units_used.saturating_sub(units);
        if record.is_exhausted() && before < record.daily_limit {
            warn!(
                user_id = %record.user_id,
                units_used = record.units_used,
                daily_limit = record.daily_limit,
                "Daily quota exhausted"
            );
            if let Some(events) = &self.events {
                events
                    .emit(CoreEvent::Quota(QuotaEvent::Exhausted {
                        user_id: record.user_id.clone(),
                        units_used: record.units_used,
                        daily_limit: record.daily_limit,
                        reset_at: record.reset_at,
                    }))
                    .ok();
            }
        }
    }
}

#[async_trait]
impl QuotaLedger for SqliteQuotaLedger {
    async fn remaining(&self, user_id: &str) -> Result<u32> {
        Ok(self.status(user_id).await?.remaining())
    }

    #[instrument(skip(self))]
    async fn charge(&self, user_id: &str, units: u32) -> Result<QuotaRecord> {
        let now = self.clock.unix_timestamp_millis();

        // Applies a due reset and the charge in one statement
        let row = sqlx::query_as::<_, QuotaRow>(
            r#"
            INSERT INTO quota_usage (user_id, units_used, daily_limit, reset_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                units_used = CASE
                    WHEN quota_usage.reset_at <= ? THEN excluded.units_used
                    ELSE quota_usage.units_used + excluded.units_used
                END,
                reset_at = CASE
                    WHEN quota_usage.reset_at <= ? THEN excluded.reset_at
                    ELSE quota_usage.reset_at
                END,
                daily_limit = excluded.daily_limit
            RETURNING user_id, units_used, daily_limit, reset_at
            "#,
        )
        .bind(user_id)
        .bind(units as i64)
        .bind(self.daily_limit as i64)
        .bind(self.next_reset_millis())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let record = QuotaRecord::from(row);
        debug!(units, units_used = record.units_used, "Charged quota");
        self.notify_if_crossed(&record, units);

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn try_reserve(&self, user_id: &str, units: u32) -> Result<QuotaRecord> {
        if units > self.daily_limit {
            return Err(SyncError::QuotaExceeded {
                user_id: user_id.to_string(),
                requested: units,
                remaining: self.remaining(user_id).await?,
            });
        }

        let now = self.clock.unix_timestamp_millis();

        let row = sqlx::query_as::<_, QuotaRow>(
            r#"
            INSERT INTO quota_usage (user_id, units_used, daily_limit, reset_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                units_used = CASE
                    WHEN quota_usage.reset_at <= ? THEN excluded.units_used
                    ELSE quota_usage.units_used + excluded.units_used
                END,
                reset_at = CASE
                    WHEN quota_usage.reset_at <= ? THEN excluded.reset_at
                    ELSE quota_usage.reset_at
                END,
                daily_limit = excluded.daily_limit
            WHERE (CASE WHEN quota_usage.reset_at <= ? THEN 0 ELSE quota_usage.units_used END)
                  + excluded.units_used <= excluded.daily_limit
            RETURNING user_id, units_used, daily_limit, reset_at
            "#,
        )
        .bind(user_id)
        .bind(units as i64)
        .bind(self.daily_limit as i64)
        .bind(self.next_reset_millis())
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let record = QuotaRecord::from(row);
                self.notify_if_crossed(&record, units);
                Ok(record)
            }
            None => Err(SyncError::QuotaExceeded {
                user_id: user_id.to_string(),
                requested: units,
                remaining: self.remaining(user_id).await?,
            }),
        }
    }

    async fn status(&self, user_id: &str) -> Result<QuotaRecord> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT user_id, units_used, daily_limit, reset_at FROM quota_usage WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let now = self.clock.unix_timestamp_millis();
        let record = match row {
            Some(row) if row.reset_at > now => {
                let mut record = QuotaRecord::from(row);
                record.daily_limit = self.daily_limit;
                record
            }
            _ => self.fresh_record(user_id),
        };

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::{Duration, TimeZone};
    use core_library::create_test_pool;

    fn pacific() -> FixedOffset {
        FixedOffset::east_opt(DEFAULT_RESET_OFFSET_MINUTES * 60).unwrap()
    }

    async fn setup(limit: u32) -> (SqliteQuotaLedger, Arc<ManualClock>) {
        let pool = create_test_pool().await.unwrap();
        // 2024-05-01 12:00 UTC, 04:00 Pacific
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let ledger =
            SqliteQuotaLedger::new(pool, clock.clone(), limit, DEFAULT_RESET_OFFSET_MINUTES)
                .unwrap();
        (ledger, clock)
    }

    #[test]
    fn test_next_reset_is_pacific_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reset = next_reset_after(now, pacific());
        assert_eq!(reset, Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap());

        // 07:59 UTC is still the previous Pacific day
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 7, 59, 0).unwrap();
        assert_eq!(
            next_reset_after(early, pacific()),
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_percent_used() {
        let record = QuotaRecord {
            user_id: "u1".to_string(),
            units_used: 2_500,
            daily_limit: 10_000,
            reset_at: 0,
        };
        assert_eq!(record.percent_used(), 25.0);
        assert_eq!(record.remaining(), 7_500);

        let over = QuotaRecord {
            units_used: 10_003,
            ..record
        };
        assert_eq!(over.percent_used(), 100.0);
        assert_eq!(over.remaining(), 0);
    }

    #[tokio::test]
    async fn test_charge_accumulates_and_may_overshoot() {
        let (ledger, _clock) = setup(10).await;

        assert_eq!(ledger.remaining("u1").await.unwrap(), 10);

        ledger.charge("u1", 4).await.unwrap();
        ledger.charge("u1", 4).await.unwrap();
        assert_eq!(ledger.remaining("u1").await.unwrap(), 2);

        let record = ledger.charge("u1", 5).await.unwrap();
        assert_eq!(record.units_used, 13);
        assert_eq!(ledger.remaining("u1").await.unwrap(), 0);

        // Users are isolated
        assert_eq!(ledger.remaining("u2").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_try_reserve_refuses_without_billing() {
        let (ledger, _clock) = setup(10).await;

        ledger.try_reserve("u1", 8).await.unwrap();
        let err = ledger.try_reserve("u1", 3).await.unwrap_err();
        match err {
            SyncError::QuotaExceeded {
                requested,
                remaining,
                ..
            } => {
                assert_eq!(requested, 3);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ledger.status("u1").await.unwrap().units_used, 8);

        assert!(ledger.try_reserve("u1", 2).await.is_ok());
        assert!(ledger.try_reserve("u2", 11).await.is_err());
    }

    #[tokio::test]
    async fn test_usage_resets_at_boundary() {
        let (ledger, clock) = setup(10).await;

        ledger.charge("u1", 10).await.unwrap();
        let status = ledger.status("u1").await.unwrap();
        assert_eq!(status.remaining(), 0);
        assert_eq!(
            status.reset_at,
            Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0)
                .unwrap()
                .timestamp_millis()
        );

        clock.advance(Duration::hours(20));

        let status = ledger.status("u1").await.unwrap();
        assert_eq!(status.units_used, 0);
        assert_eq!(
            status.reset_at,
            Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0)
                .unwrap()
                .timestamp_millis()
        );

        let record = ledger.charge("u1", 1).await.unwrap();
        assert_eq!(record.units_used, 1);
        assert!(ledger.try_reserve("u1", 9).await.is_ok());
    }

    #[tokio::test]
    async fn test_exhaustion_is_published_once() {
        let (ledger, _clock) = setup(3).await;
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let ledger = ledger.with_events(events);

        ledger.charge("u1", 2).await.unwrap();
        ledger.charge("u1", 2).await.unwrap();
        ledger.charge("u1", 1).await.unwrap();

        match rx.try_recv().unwrap() {
            CoreEvent::Quota(QuotaEvent::Exhausted { units_used, .. }) => {
                assert_eq!(units_used, 4)
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_charges_are_not_lost() {
        let (ledger, _clock) = setup(1_000).await;
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.charge("u1", 3).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(ledger.status("u1").await.unwrap().units_used, 60);
    }
}
