//! # Service Configuration Module
//!
//! Configuration for the subscription sync service.
//!
//! ## Overview
//!
//! [`SyncServiceConfig`] is assembled with a builder that validates eagerly and
//! reports actionable messages. The same builder backs [`SyncServiceConfig::from_env`],
//! which reads `SUBSYNC_*` variables.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncServiceConfig;
//! use std::time::Duration;
//!
//! let config = SyncServiceConfig::builder()
//!     .database_path("/var/lib/subsync/catalog.db")
//!     .cron_secret("a-long-shared-secret")
//!     .execution_ceiling(Duration::from_secs(300))
//!     .build()?;
//! ```
//!
//! ## Environment
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SUBSYNC_DATABASE_PATH` | required |
//! | `SUBSYNC_CRON_SECRET` | required |
//! | `SUBSYNC_BIND_ADDRESS` | `0.0.0.0:8080` |
//! | `SUBSYNC_API_BASE_URL` | YouTube Data API v3 |
//! | `SUBSYNC_QUOTA_DAILY_LIMIT` | `10000` |
//! | `SUBSYNC_QUOTA_RESET_OFFSET_MINUTES` | `-480` |
//! | `SUBSYNC_CRON_FAILURE_LIMIT` | `5` |
//! | `SUBSYNC_CRON_FAILURE_WINDOW_SECS` | `900` |
//! | `SUBSYNC_EXECUTION_CEILING_SECS` | `300` |
//! | `SUBSYNC_STALE_AFTER_SECS` | `30` |
//! | `SUBSYNC_TAKEOVER_AFTER_SECS` | `360` |
//! | `SUBSYNC_DEFAULT_VIDEO_DEPTH` | `50` |
//! | `SUBSYNC_ONBOARDING_VIDEO_DEPTH` | `10` |
//! | `SUBSYNC_PAGE_SIZE` | `50` |
//! | `SUBSYNC_EVENT_BUFFER_SIZE` | `100` |
//! | `SUBSYNC_REQUEST_TIMEOUT_SECS` | `330` |
//! | `SUBSYNC_CONCURRENCY_LIMIT` | unset |
//! | `SUBSYNC_LOG_LEVEL` | `info` |
//! | `SUBSYNC_LOG_FORMAT` | `pretty` in debug builds, `json` otherwise |

use crate::error::{Error, Result};
use crate::logging::{LogFormat, LoggingConfig};
use bridge_traits::time::LogLevel;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Largest page the upstream listing endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Configuration for the sync service.
#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    /// Path to the SQLite catalog database
    pub database_path: PathBuf,

    /// Address the HTTP server binds to
    pub bind_address: SocketAddr,

    /// Shared secret scheduled callers present in `Authorization`
    pub cron_secret: String,

    /// Base URL of the video platform API
    pub api_base_url: String,

    /// Daily quota units granted per user
    pub quota_daily_limit: u32,

    /// Offset from UTC, in minutes, of the zone whose midnight resets quota
    pub quota_reset_offset_minutes: i32,

    /// Bad cron secrets tolerated inside the failure window before 429
    pub cron_failure_limit: u32,

    /// Sliding window for counting bad cron secrets
    pub cron_failure_window: Duration,

    /// Wall-clock budget for one triggered run
    pub execution_ceiling: Duration,

    /// Age after which an unchanged non-terminal progress record looks stale
    pub stale_after: Duration,

    /// Age after which an unchanged non-terminal run counts as abandoned
    pub takeover_after: Duration,

    /// Videos fetched per channel when the channel has no depth policy
    pub default_video_depth: u32,

    /// Videos fetched per channel during onboarding
    pub onboarding_video_depth: u32,

    /// Page size for upstream listings
    pub page_size: u32,

    /// Buffer size of the sync event bus
    pub event_buffer_size: usize,

    /// Per-request timeout for the HTTP server
    pub request_timeout: Option<Duration>,

    /// Maximum concurrent in-flight HTTP requests
    pub concurrency_limit: Option<usize>,

    /// Minimum log level
    pub log_level: LogLevel,

    /// Log output format
    pub log_format: LogFormat,
}

impl SyncServiceConfig {
    /// Creates a new builder for constructing a `SyncServiceConfig`.
    pub fn builder() -> SyncServiceConfigBuilder {
        SyncServiceConfigBuilder::default()
    }

    /// Loads configuration from `SUBSYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(path) = lookup("SUBSYNC_DATABASE_PATH") {
            builder = builder.database_path(path);
        }
        if let Some(secret) = lookup("SUBSYNC_CRON_SECRET") {
            builder = builder.cron_secret(secret);
        }
        if let Some(address) = lookup("SUBSYNC_BIND_ADDRESS") {
            builder = builder.bind_address(parse_value("SUBSYNC_BIND_ADDRESS", &address)?);
        }
        if let Some(url) = lookup("SUBSYNC_API_BASE_URL") {
            builder = builder.api_base_url(url);
        }
        if let Some(value) = lookup("SUBSYNC_QUOTA_DAILY_LIMIT") {
            builder = builder.quota_daily_limit(parse_value("SUBSYNC_QUOTA_DAILY_LIMIT", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_QUOTA_RESET_OFFSET_MINUTES") {
            builder = builder.quota_reset_offset_minutes(parse_value(
                "SUBSYNC_QUOTA_RESET_OFFSET_MINUTES",
                &value,
            )?);
        }
        if let Some(value) = lookup("SUBSYNC_CRON_FAILURE_LIMIT") {
            builder =
                builder.cron_failure_limit(parse_value("SUBSYNC_CRON_FAILURE_LIMIT", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_CRON_FAILURE_WINDOW_SECS") {
            builder = builder.cron_failure_window(parse_secs(
                "SUBSYNC_CRON_FAILURE_WINDOW_SECS",
                &value,
            )?);
        }
        if let Some(value) = lookup("SUBSYNC_EXECUTION_CEILING_SECS") {
            builder =
                builder.execution_ceiling(parse_secs("SUBSYNC_EXECUTION_CEILING_SECS", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_STALE_AFTER_SECS") {
            builder = builder.stale_after(parse_secs("SUBSYNC_STALE_AFTER_SECS", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_TAKEOVER_AFTER_SECS") {
            builder = builder.takeover_after(parse_secs("SUBSYNC_TAKEOVER_AFTER_SECS", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_DEFAULT_VIDEO_DEPTH") {
            builder =
                builder.default_video_depth(parse_value("SUBSYNC_DEFAULT_VIDEO_DEPTH", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_ONBOARDING_VIDEO_DEPTH") {
            builder = builder.onboarding_video_depth(parse_value(
                "SUBSYNC_ONBOARDING_VIDEO_DEPTH",
                &value,
            )?);
        }
        if let Some(value) = lookup("SUBSYNC_PAGE_SIZE") {
            builder = builder.page_size(parse_value("SUBSYNC_PAGE_SIZE", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_EVENT_BUFFER_SIZE") {
            builder = builder.event_buffer_size(parse_value("SUBSYNC_EVENT_BUFFER_SIZE", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_REQUEST_TIMEOUT_SECS") {
            builder =
                builder.request_timeout(parse_secs("SUBSYNC_REQUEST_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_CONCURRENCY_LIMIT") {
            builder = builder.concurrency_limit(parse_value("SUBSYNC_CONCURRENCY_LIMIT", &value)?);
        }
        if let Some(value) = lookup("SUBSYNC_LOG_LEVEL") {
            let level = LogLevel::parse(&value).ok_or_else(|| {
                Error::Config(format!(
                    "SUBSYNC_LOG_LEVEL has unknown level '{}'. Use trace, debug, info, warn or error.",
                    value
                ))
            })?;
            builder = builder.log_level(level);
        }
        if let Some(value) = lookup("SUBSYNC_LOG_FORMAT") {
            builder = builder.log_format(value.parse()?);
        }

        builder.build()
    }

    /// Logging configuration derived from this service configuration.
    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.log_level)
            .with_format(self.log_format)
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path and cron secret are present
    /// - Quota limit and reset offset are sane
    /// - The takeover window outlives the execution ceiling
    /// - The request timeout outlives the takeover window
    /// - Page size fits the upstream API
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.cron_secret.trim().is_empty() {
            return Err(Error::Config("Cron secret cannot be empty".to_string()));
        }

        if self.api_base_url.trim().is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        if self.quota_daily_limit == 0 {
            return Err(Error::Config(
                "Quota daily limit must be greater than 0 units".to_string(),
            ));
        }

        if self.quota_reset_offset_minutes.abs() > 14 * 60 {
            return Err(Error::Config(format!(
                "Quota reset offset of {} minutes is outside the valid range of -840..=840",
                self.quota_reset_offset_minutes
            )));
        }

        if self.cron_failure_limit == 0 {
            return Err(Error::Config(
                "Cron failure limit must be at least 1".to_string(),
            ));
        }

        if self.cron_failure_window.is_zero() {
            return Err(Error::Config(
                "Cron failure window must be longer than 0 seconds".to_string(),
            ));
        }

        if self.execution_ceiling.is_zero() {
            return Err(Error::Config(
                "Execution ceiling must be longer than 0 seconds".to_string(),
            ));
        }

        if self.takeover_after <= self.execution_ceiling {
            return Err(Error::Config(format!(
                "Takeover window ({}s) must exceed the execution ceiling ({}s), \
                 otherwise a live run could be taken over.",
                self.takeover_after.as_secs(),
                self.execution_ceiling.as_secs()
            )));
        }

        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        if self.default_video_depth == 0 || self.onboarding_video_depth == 0 {
            return Err(Error::Config(
                "Video depths must be greater than 0. Use a per-channel policy for new-only syncs."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if let Some(timeout) = self.request_timeout {
            if timeout <= self.takeover_after {
                return Err(Error::Config(format!(
                    "Request timeout ({}s) must exceed the takeover window ({}s) \
                     because sync requests run to completion before responding.",
                    timeout.as_secs(),
                    self.takeover_after.as_secs()
                )));
            }
        }

        if self.concurrency_limit == Some(0) {
            return Err(Error::Config(
                "Concurrency limit must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", key, raw, e)))
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration> {
    parse_value::<u64>(key, raw).map(Duration::from_secs)
}

/// Builder for [`SyncServiceConfig`].
#[derive(Debug, Default)]
pub struct SyncServiceConfigBuilder {
    database_path: Option<PathBuf>,
    bind_address: Option<SocketAddr>,
    cron_secret: Option<String>,
    api_base_url: Option<String>,
    quota_daily_limit: Option<u32>,
    quota_reset_offset_minutes: Option<i32>,
    cron_failure_limit: Option<u32>,
    cron_failure_window: Option<Duration>,
    execution_ceiling: Option<Duration>,
    stale_after: Option<Duration>,
    takeover_after: Option<Duration>,
    default_video_depth: Option<u32>,
    onboarding_video_depth: Option<u32>,
    page_size: Option<u32>,
    event_buffer_size: Option<usize>,
    request_timeout: Option<Duration>,
    disable_request_timeout: bool,
    concurrency_limit: Option<usize>,
    log_level: Option<LogLevel>,
    log_format: Option<LogFormat>,
}

impl SyncServiceConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn bind_address(mut self, address: SocketAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn cron_secret(mut self, secret: impl Into<String>) -> Self {
        self.cron_secret = Some(secret.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn quota_daily_limit(mut self, units: u32) -> Self {
        self.quota_daily_limit = Some(units);
        self
    }

    /// Offset of the quota reset zone. Pacific standard time is `-480`.
    pub fn quota_reset_offset_minutes(mut self, minutes: i32) -> Self {
        self.quota_reset_offset_minutes = Some(minutes);
        self
    }

    pub fn cron_failure_limit(mut self, limit: u32) -> Self {
        self.cron_failure_limit = Some(limit);
        self
    }

    pub fn cron_failure_window(mut self, window: Duration) -> Self {
        self.cron_failure_window = Some(window);
        self
    }

    pub fn execution_ceiling(mut self, ceiling: Duration) -> Self {
        self.execution_ceiling = Some(ceiling);
        self
    }

    pub fn stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = Some(threshold);
        self
    }

    pub fn takeover_after(mut self, threshold: Duration) -> Self {
        self.takeover_after = Some(threshold);
        self
    }

    pub fn default_video_depth(mut self, depth: u32) -> Self {
        self.default_video_depth = Some(depth);
        self
    }

    pub fn onboarding_video_depth(mut self, depth: u32) -> Self {
        self.onboarding_video_depth = Some(depth);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self.disable_request_timeout = false;
        self
    }

    /// Serve requests without a timeout layer.
    pub fn without_request_timeout(mut self) -> Self {
        self.request_timeout = None;
        self.disable_request_timeout = true;
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.log_format = Some(format);
        self
    }

    /// Builds the final `SyncServiceConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error when the database path or cron secret is missing, or
    /// when [`SyncServiceConfig::validate`] rejects the combination.
    pub fn build(self) -> Result<SyncServiceConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config(
                "Database path is required. Use .database_path() or SUBSYNC_DATABASE_PATH."
                    .to_string(),
            )
        })?;

        let cron_secret = self.cron_secret.ok_or_else(|| {
            Error::Config(
                "Cron secret is required. Use .cron_secret() or SUBSYNC_CRON_SECRET.".to_string(),
            )
        })?;

        let bind_address = match self.bind_address {
            Some(address) => address,
            None => DEFAULT_BIND_ADDRESS
                .parse()
                .map_err(|e| Error::Internal(format!("Default bind address is invalid: {}", e)))?,
        };

        let execution_ceiling = self.execution_ceiling.unwrap_or(Duration::from_secs(300));
        let takeover_after = self
            .takeover_after
            .unwrap_or(execution_ceiling + Duration::from_secs(60));
        let request_timeout = if self.disable_request_timeout {
            None
        } else {
            Some(
                self.request_timeout
                    .unwrap_or(takeover_after + Duration::from_secs(30)),
            )
        };

        let config = SyncServiceConfig {
            database_path,
            bind_address,
            cron_secret,
            api_base_url: self
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
            quota_daily_limit: self.quota_daily_limit.unwrap_or(10_000),
            quota_reset_offset_minutes: self.quota_reset_offset_minutes.unwrap_or(-480),
            cron_failure_limit: self.cron_failure_limit.unwrap_or(5),
            cron_failure_window: self
                .cron_failure_window
                .unwrap_or(Duration::from_secs(15 * 60)),
            execution_ceiling,
            stale_after: self.stale_after.unwrap_or(Duration::from_secs(30)),
            takeover_after,
            default_video_depth: self.default_video_depth.unwrap_or(50),
            onboarding_video_depth: self.onboarding_video_depth.unwrap_or(10),
            page_size: self.page_size.unwrap_or(MAX_PAGE_SIZE),
            event_buffer_size: self.event_buffer_size.unwrap_or(100),
            request_timeout,
            concurrency_limit: self.concurrency_limit,
            log_level: self.log_level.unwrap_or(LogLevel::Info),
            log_format: self.log_format.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
