//! Sync run endpoints.
//!
//! Triggers run synchronously: the response is sent once the run completes
//! or stops early. Clients poll `GET /sync/progress` from another request
//! while they wait.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use bridge_traits::time::Clock;
use core_sync::{OnboardingPlan, SyncProgress, SyncScope};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::context::AuthenticatedUser;
use crate::error::Result;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/subscriptions", post(sync_subscriptions))
        .route("/sync/videos", post(sync_videos))
        .route("/sync/onboarding", post(onboarding))
        .route("/sync/progress", get(progress))
        .route("/sync/cancel", post(cancel))
}

/// Body of `POST /sync/videos`. Without a body every channel is synced.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncVideosRequest {
    pub group_id: Option<String>,
    #[serde(default)]
    pub grouped_only: bool,
}

impl SyncVideosRequest {
    fn scope(self) -> SyncScope {
        match self.group_id {
            Some(group_id) => SyncScope::Group(group_id),
            None if self.grouped_only => SyncScope::GroupedOnly,
            None => SyncScope::All,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSyncResponse {
    pub videos_imported: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_refresh: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_videos: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Eta {
    pub estimated_seconds_remaining: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub is_active: bool,
    /// A run that stopped writing without finishing
    pub is_stale: bool,
    pub progress: Option<SyncProgress>,
    pub eta: Option<Eta>,
}

async fn sync_subscriptions(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>> {
    let result = state.orchestrator.import_subscriptions(&user).await?;
    Ok(Json(json!({ "channelsImported": result.channels_imported })))
}

async fn sync_videos(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: Option<Json<SyncVideosRequest>>,
) -> Result<Json<VideoSyncResponse>> {
    let scope = body.map(|Json(request)| request.scope()).unwrap_or(SyncScope::All);
    let result = state.orchestrator.sync_videos(&user, scope).await?;

    Ok(Json(VideoSyncResponse {
        videos_imported: result.videos_imported,
        is_refresh: result.is_refresh,
        new_videos: result.new_videos,
    }))
}

async fn onboarding(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    body: Option<Json<OnboardingPlan>>,
) -> Result<Json<core_sync::SyncRunResult>> {
    let plan = body.map(|Json(plan)| plan).unwrap_or_default();
    let result = state.orchestrator.onboard(&user, plan).await?;
    Ok(Json(result))
}

async fn progress(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<ProgressResponse>> {
    let progress = state.orchestrator.progress(&user).await?;
    let is_active = state.orchestrator.is_sync_active(&user).await?;
    let now = state.orchestrator.clock().unix_timestamp_millis();

    let is_stale = progress
        .as_ref()
        .is_some_and(|p| p.is_stale(now, state.stale_after_millis()));
    let eta = progress
        .as_ref()
        .and_then(|p| p.estimated_seconds_remaining(now))
        .map(|estimated_seconds_remaining| Eta {
            estimated_seconds_remaining,
        });

    Ok(Json(ProgressResponse {
        is_active,
        is_stale,
        progress,
        eta,
    }))
}

async fn cancel(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Value>> {
    let signalled = state.orchestrator.cancel(&user).await?;
    info!(user_id = %user, signalled, "Cancel requested over HTTP");
    Ok(Json(json!({ "cancelled": true })))
}
