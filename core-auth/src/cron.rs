//! Scheduled-caller authentication
//!
//! Scheduled jobs present a shared secret. Bad secrets are remembered in a
//! sliding window; once the window holds `limit` failures, further bad
//! attempts are reported as rate limited so automated callers back off
//! instead of retrying blindly. A correct secret always succeeds and clears
//! the window.

use bridge_traits::time::Clock;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of checking one scheduled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronAuthOutcome {
    pub valid: bool,
    pub rate_limited: bool,
}

impl CronAuthOutcome {
    const VALID: Self = Self {
        valid: true,
        rate_limited: false,
    };
    const REJECTED: Self = Self {
        valid: false,
        rate_limited: false,
    };
    const RATE_LIMITED: Self = Self {
        valid: false,
        rate_limited: true,
    };
}

/// Shared-secret validator with a sliding failure window.
pub struct CronAuthenticator {
    limit: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
    failures: Mutex<VecDeque<DateTime<Utc>>>,
}

impl CronAuthenticator {
    pub fn new(limit: u32, window: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            limit: limit.max(1) as usize,
            window: Duration::from_std(window).unwrap_or_else(|_| Duration::minutes(15)),
            clock,
            failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Check `provided` against `expected`.
    ///
    /// A missing secret counts as a bad one. Rate-limited attempts are still
    /// recorded, so a caller that keeps hammering stays throttled until it
    /// pauses for a full window.
    pub async fn validate(&self, provided: Option<&str>, expected: &str) -> CronAuthOutcome {
        let now = self.clock.now();
        let mut failures = self.failures.lock().await;

        let horizon = now - self.window;
        while failures.front().is_some_and(|at| *at <= horizon) {
            failures.pop_front();
        }

        let matches = provided.is_some_and(|secret| secrets_match(secret, expected));
        if matches {
            if !failures.is_empty() {
                debug!(
                    cleared = failures.len(),
                    "Valid cron secret cleared failure window"
                );
            }
            failures.clear();
            return CronAuthOutcome::VALID;
        }

        let rate_limited = failures.len() >= self.limit;
        failures.push_back(now);

        warn!(
            recent_failures = failures.len(),
            rate_limited, "Rejected cron secret"
        );

        if rate_limited {
            CronAuthOutcome::RATE_LIMITED
        } else {
            CronAuthOutcome::REJECTED
        }
    }

    /// Failures currently inside the window.
    pub async fn recent_failures(&self) -> usize {
        let horizon = self.clock.now() - self.window;
        self.failures
            .lock()
            .await
            .iter()
            .filter(|at| **at > horizon)
            .count()
    }
}

/// Pull the secret out of an `Authorization` header value.
///
/// Both a bare secret and `Bearer <secret>` are accepted.
pub fn extract_cron_secret(header: &str) -> Option<&str> {
    let trimmed = header.trim();
    let secret = match trimmed.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => trimmed,
    };

    (!secret.is_empty()).then_some(secret)
}

/// Digest both sides so comparison time does not depend on where they differ.
fn secrets_match(provided: &str, expected: &str) -> bool {
    let left = Sha256::digest(provided.as_bytes());
    let right = Sha256::digest(expected.as_bytes());

    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::time::ManualClock;
    use chrono::TimeZone;

    const SECRET: &str = "cron-shared-secret";

    fn authenticator() -> (CronAuthenticator, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let auth = CronAuthenticator::new(5, std::time::Duration::from_secs(15 * 60), clock.clone());
        (auth, clock)
    }

    #[tokio::test]
    async fn test_valid_secret() {
        let (auth, _) = authenticator();
        let outcome = auth.validate(Some(SECRET), SECRET).await;
        assert!(outcome.valid);
        assert!(!outcome.rate_limited);
    }

    #[tokio::test]
    async fn test_sixth_bad_secret_is_rate_limited() {
        let (auth, clock) = authenticator();

        for _ in 0..5 {
            let outcome = auth.validate(Some("wrong"), SECRET).await;
            assert_eq!(outcome, CronAuthOutcome::REJECTED);
            clock.advance(Duration::seconds(10));
        }

        let sixth = auth.validate(Some("wrong"), SECRET).await;
        assert!(!sixth.valid);
        assert!(sixth.rate_limited);
    }

    #[tokio::test]
    async fn test_window_expiry_restores_plain_rejection() {
        let (auth, clock) = authenticator();

        for _ in 0..6 {
            auth.validate(Some("wrong"), SECRET).await;
        }
        assert_eq!(auth.recent_failures().await, 6);

        clock.advance(Duration::minutes(15) + Duration::seconds(1));
        let outcome = auth.validate(Some("wrong"), SECRET).await;
        assert_eq!(outcome, CronAuthOutcome::REJECTED);
        assert_eq!(auth.recent_failures().await, 1);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let (auth, _) = authenticator();

        for _ in 0..5 {
            auth.validate(None, SECRET).await;
        }
        assert!(auth.validate(Some(SECRET), SECRET).await.valid);
        assert_eq!(auth.recent_failures().await, 0);

        let outcome = auth.validate(Some("wrong"), SECRET).await;
        assert_eq!(outcome, CronAuthOutcome::REJECTED);
    }

    #[test]
    fn test_extract_cron_secret() {
        assert_eq!(extract_cron_secret("abc"), Some("abc"));
        assert_eq!(extract_cron_secret("Bearer abc"), Some("abc"));
        assert_eq!(extract_cron_secret("bearer   abc "), Some("abc"));
        assert_eq!(extract_cron_secret("  "), None);
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("a", "a"));
        assert!(!secrets_match("a", "b"));
        assert!(!secrets_match("", "a"));
    }
}
