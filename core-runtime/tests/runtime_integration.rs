//! Integration tests for configuration, logging and the event bus

use bridge_traits::time::LogLevel;
use core_runtime::events::{CoreEvent, EventBus, EventStream, SyncEvent};
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};
use core_runtime::SyncServiceConfig;
use std::time::Duration;

#[test]
fn test_service_config_drives_logging_config() {
    let config = SyncServiceConfig::builder()
        .database_path("/tmp/subsync.db")
        .cron_secret("secret")
        .log_level(LogLevel::Warn)
        .log_format(LogFormat::Compact)
        .build()
        .unwrap();

    let logging = config.logging_config();
    assert_eq!(logging.level, LogLevel::Warn);
    assert_eq!(logging.format, LogFormat::Compact);
    assert!(logging.filter.is_none());
}

#[test]
fn test_logging_initializes_only_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    assert!(init_logging(config.clone()).is_ok());

    let second = init_logging(config);
    assert!(second
        .unwrap_err()
        .to_string()
        .contains("Failed to initialize logging"));
}

#[test]
fn test_invalid_filter_is_reported() {
    let config = LoggingConfig::default().with_filter("core_sync=notalevel");
    assert!(init_logging(config)
        .unwrap_err()
        .to_string()
        .contains("Invalid log filter"));
}

#[test]
fn test_cron_secret_never_logged_verbatim() {
    let config = SyncServiceConfig::builder()
        .database_path("/tmp/subsync.db")
        .cron_secret("super-secret-value")
        .build()
        .unwrap();

    let logged = redact_if_sensitive("cron_secret", &config.cron_secret);
    assert_eq!(logged, "[REDACTED]");
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "user_123");
}

#[tokio::test]
async fn test_event_bus_sized_from_config() {
    let config = SyncServiceConfig::builder()
        .database_path("/tmp/subsync.db")
        .cron_secret("secret")
        .event_buffer_size(4)
        .execution_ceiling(Duration::from_secs(30))
        .build()
        .unwrap();

    let bus = EventBus::new(config.event_buffer_size);
    let mut stream = EventStream::new(bus.subscribe())
        .filter(|event| event.user_id() == Some("user-2"));

    for user in ["user-1", "user-2"] {
        bus.emit(CoreEvent::Sync(SyncEvent::Cancelled {
            user_id: user.to_string(),
            run_id: "run".to_string(),
        }))
        .ok();
    }

    let received = stream.recv().await.unwrap();
    assert_eq!(received.user_id(), Some("user-2"));
}
