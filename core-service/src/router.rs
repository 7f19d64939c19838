//! Router setup.

use axum::error_handling::HandleErrorLayer;
use axum::extract::OriginalUri;
use axum::http::StatusCode;
use axum::{middleware, Json, Router};
use tower::limit::ConcurrencyLimitLayer;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::request_id_middleware;
use crate::error::{ApiError, ErrorBody};
use crate::routes;
use crate::state::AppState;

/// Creates the sync service router.
pub fn sync_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout;
    let concurrency_limit = state.config.concurrency_limit;

    let router = Router::new()
        .merge(routes::sync::routes())
        .merge(routes::cron::routes())
        .merge(routes::catalog::routes())
        .fallback(not_found)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    let router = match concurrency_limit {
        Some(limit) => router.layer(ConcurrencyLimitLayer::new(limit)),
        None => router,
    };

    let router = match request_timeout {
        Some(timeout) => router.layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(timeout)),
        ),
        None => router,
    };

    router.with_state(state)
}

async fn not_found(uri: OriginalUri) -> ApiError {
    ApiError::NotFound {
        message: format!("not found: {}", uri.0.path()),
    }
}

async fn handle_timeout_error(_err: tower::BoxError) -> (StatusCode, Json<ErrorBody>) {
    let body = ErrorBody {
        error_code: "SERVICE_UNAVAILABLE",
        message: "Request timed out".to_string(),
        start_over: false,
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body))
}
