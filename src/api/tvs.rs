use axum::extract::{Extension, Path};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use crate::api::{ApiContext, Mutation, Result};
use crate::entities::{ImageRecord, TvId, TvRecord};
use crate::tags::TvMatch;
use crate::tvs::{NewTv, TvUpdate};

pub fn router() -> Router {
    Router::new()
        .route("/api/tvs", get(list_tvs).post(add_tv))
        .route("/api/tvs/match", post(match_tvs))
        .route("/api/tvs/:id", patch(update_tv).delete(delete_tv))
        .route("/api/tvs/:id/tags", put(set_tags))
        .route("/api/tvs/:id/images", get(tv_images))
}

#[derive(serde::Deserialize, Debug)]
struct TagsBody {
    tags: Vec<String>,
}

#[derive(serde::Serialize, Debug)]
struct Deleted {
    id: TvId,
}

async fn list_tvs(
    ctx: Extension<ApiContext>,
) -> Result<Json<Vec<TvRecord>>> {
    Ok(Json(ctx.library.list_tvs().await?))
}

async fn add_tv(
    ctx: Extension<ApiContext>,
    Json(req): Json<NewTv>,
) -> Result<Json<Mutation<TvRecord>>> {
    let (tv, changes) = ctx.library.add_tv(req).await?;
    Ok(Json(ctx.publish(tv, changes).await))
}

async fn update_tv(
    ctx: Extension<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<TvUpdate>,
) -> Result<Json<Mutation<TvRecord>>> {
    let (tv, changes) = ctx.library.update_tv(&id, req).await?;
    Ok(Json(ctx.publish(tv, changes).await))
}

async fn set_tags(
    ctx: Extension<ApiContext>,
    Path(id): Path<String>,
    Json(req): Json<TagsBody>,
) -> Result<Json<Mutation<TvRecord>>> {
    let (tv, changes) = ctx.library.set_tv_tags(&id, &req.tags).await?;
    Ok(Json(ctx.publish(tv, changes).await))
}

async fn delete_tv(
    ctx: Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Mutation<Deleted>>> {
    let changes = ctx.library.delete_tv(&id).await?;
    Ok(Json(ctx.publish(Deleted { id }, changes).await))
}

async fn tv_images(
    ctx: Extension<ApiContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ImageRecord>>> {
    Ok(Json(ctx.library.tv_images(&id).await?))
}

async fn match_tvs(
    ctx: Extension<ApiContext>,
    Json(req): Json<TagsBody>,
) -> Result<Json<Vec<TvMatch>>> {
    Ok(Json(ctx.library.match_tvs(&req.tags).await?))
}
