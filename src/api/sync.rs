use axum::extract::Extension;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use crate::api::{ApiContext, Result};
use crate::git::{PullOutcome, PushOutcome, SyncLogEntry, SyncState, SyncStatus};

pub fn router() -> Router {
    Router::new()
        .route("/api/sync/status", get(status))
        .route("/api/sync/verify", post(verify))
        .route("/api/sync/check", post(check))
        .route("/api/sync/pull", post(pull))
        .route("/api/sync/push", post(push))
        .route("/api/sync/log", get(log))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    status: SyncStatus,
    /// Number of image changes waiting to be pushed.
    badge: usize,
}

#[derive(Serialize)]
struct StateResponse {
    state: SyncState,
}

async fn status(
    ctx: Extension<ApiContext>,
) -> Result<Json<StatusResponse>> {
    let status = ctx.sync.status().await?;
    let badge = status.summary.image_changes();
    Ok(Json(StatusResponse { status, badge }))
}

async fn verify(
    ctx: Extension<ApiContext>,
) -> Result<Json<StateResponse>> {
    ctx.sync.verify().await?;
    Ok(Json(StateResponse { state: ctx.sync.state() }))
}

/// Called on every page load.
async fn check(
    ctx: Extension<ApiContext>,
) -> Result<Json<PullOutcome>> {
    Ok(Json(ctx.sync.guarded_pull().await?))
}

/// Explicit pull; re-checks the repository setup first.
async fn pull(
    ctx: Extension<ApiContext>,
) -> Result<Json<PullOutcome>> {
    ctx.sync.verify().await?;
    Ok(Json(ctx.sync.guarded_pull().await?))
}

async fn push(
    ctx: Extension<ApiContext>,
) -> Result<Json<PushOutcome>> {
    Ok(Json(ctx.sync.sync_pending().await?))
}

async fn log(
    ctx: Extension<ApiContext>,
) -> Result<Json<Vec<SyncLogEntry>>> {
    Ok(Json(ctx.sync.recent_log().await))
}
