use axum::extract::{Extension, Path};
use axum::routing::{delete, get};
use axum::{Json, Router};
use crate::api::{ApiContext, Mutation, Result};
use crate::entities::Tag;
use crate::tags::TagRemoval;

pub fn router() -> Router {
    Router::new()
        .route("/api/tags", get(list_tags).post(add_tag))
        .route("/api/tags/:name", delete(delete_tag))
}

#[derive(serde::Deserialize, Debug)]
struct TagBody {
    name: String,
}

async fn list_tags(
    ctx: Extension<ApiContext>,
) -> Result<Json<Vec<Tag>>> {
    Ok(Json(ctx.library.list_tags().await?))
}

async fn add_tag(
    ctx: Extension<ApiContext>,
    Json(req): Json<TagBody>,
) -> Result<Json<Mutation<Tag>>> {
    let (tag, changes) = ctx.library.add_tag(&req.name).await?;
    Ok(Json(ctx.publish(tag, changes).await))
}

async fn delete_tag(
    ctx: Extension<ApiContext>,
    Path(name): Path<String>,
) -> Result<Json<Mutation<TagRemoval>>> {
    let (removal, changes) = ctx.library.delete_tag(&name).await?;
    Ok(Json(ctx.publish(removal, changes).await))
}
