//! Scheduled refresh endpoint for the external cron caller.

use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use core_auth::extract_cron_secret;
use core_library::PriorityTier;
use core_sync::CronRunSummary;
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/cron/refresh", get(refresh))
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    pub tier: Option<String>,
}

async fn refresh(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
    headers: HeaderMap,
) -> Result<Json<CronRunSummary>> {
    let tier = match query.tier.as_deref() {
        Some(raw) => raw
            .parse::<PriorityTier>()
            .map_err(|e| ApiError::bad_request(e.to_string()))?,
        None => PriorityTier::High,
    };

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_cron_secret);

    let summary = state.scheduler.refresh(provided, tier).await?;
    Ok(Json(summary))
}
