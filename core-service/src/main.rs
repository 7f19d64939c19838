use anyhow::Context;
use core_runtime::config::SyncServiceConfig;
use core_runtime::events::{CoreEvent, EventBus, EventSeverity};
use core_runtime::logging::init_logging;
use core_service::CoreService;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SyncServiceConfig::from_env().context("failed to load configuration")?;
    init_logging(config.logging_config()).context("failed to initialize logging")?;

    let service = CoreService::from_config(&config)
        .await
        .context("failed to start core service")?;
    tokio::spawn(log_events(service.events()));

    let listener = TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!(address = %config.bind_address, "Listening");

    axum::serve(listener, service.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

/// Mirror engine events into the log.
async fn log_events(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &CoreEvent) {
    let user_id = event.user_id().unwrap_or("-");
    match event.severity() {
        EventSeverity::Error => error!(user_id, ?event, "{}", event.description()),
        EventSeverity::Warning => warn!(user_id, ?event, "{}", event.description()),
        EventSeverity::Info => info!(user_id, "{}", event.description()),
        EventSeverity::Debug => debug!(user_id, ?event, "{}", event.description()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
