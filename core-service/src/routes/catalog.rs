//! Quota status, bulk deletes and health.

use axum::extract::State;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::context::AuthenticatedUser;
use crate::error::Result;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/quota", get(quota))
        .route("/videos/delete-all", delete(delete_all_videos))
        .route("/groups/delete-all", delete(delete_all_groups))
        .route("/health", get(health))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub units_used: u32,
    pub daily_limit: u32,
    pub remaining: u32,
    /// Unix milliseconds
    pub reset_at: i64,
    pub percent_used: f64,
}

async fn quota(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<QuotaResponse>> {
    let record = state.orchestrator.quota().status(user.as_str()).await?;

    Ok(Json(QuotaResponse {
        units_used: record.units_used,
        daily_limit: record.daily_limit,
        remaining: record.remaining(),
        reset_at: record.reset_at,
        percent_used: record.percent_used(),
    }))
}

async fn delete_all_videos(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>> {
    let deleted = state
        .orchestrator
        .purge()
        .delete_all_videos(user.as_str())
        .await?;
    info!(user_id = %user, deleted, "Deleted all videos");
    Ok(Json(json!({ "deleted": deleted })))
}

async fn delete_all_groups(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>> {
    let deleted = state
        .orchestrator
        .purge()
        .delete_all_groups(user.as_str())
        .await?;
    info!(user_id = %user, deleted, "Deleted all groups");
    Ok(Json(json!({ "deleted": deleted })))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
