use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Extension, Multipart, Path, Query};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use crate::api::{stream_file, ApiContext, ApiError, Mutation, Result};
use crate::entities::{Filename, ImageRecord, Matte, PhotoFilter};
use crate::error::LibraryError;
use crate::library::{BulkTagReport, ImageQuery, ImageUpdate, TagMode, Upload};
use crate::utils::split_tags;

const MAX_UPLOAD_SIZE_IN_BYTES: usize = 52_428_800; // 50 MB

pub fn router() -> Router {
    Router::new()
        .route("/api/images", get(list_images))
        .route("/api/images/upload", post(upload_image))
        .route("/api/images/bulk-tag", post(bulk_tag))
        .route("/api/images/:filename", get(get_image).patch(update_image).delete(delete_image))
        .route("/api/images/:filename/rename", post(rename_image))
        .route("/api/images/:filename/thumbnail", get(get_thumbnail))
        .route("/api/images/:filename/file", get(get_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE_IN_BYTES))
}

#[derive(serde::Deserialize, Debug, Default)]
struct ListParams {
    tags: Option<String>,
    mode: Option<TagMode>,
    untagged: Option<bool>,
}

#[derive(serde::Deserialize, Debug)]
struct RenameBody {
    name: String,
}

#[derive(serde::Deserialize, Debug)]
struct BulkTagBody {
    filenames: Vec<Filename>,
    tags: Vec<String>,
}

#[derive(serde::Serialize, Debug)]
struct Deleted {
    filename: Filename,
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::unprocessable_entity([("file", format!("multipart error: {e}"))])
}

async fn list_images(
    ctx: Extension<ApiContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ImageRecord>>> {
    let query = ImageQuery {
        tags: params.tags.as_deref().map(split_tags).unwrap_or_default(),
        mode: params.mode.unwrap_or_default(),
        untagged: params.untagged.unwrap_or(false),
    };
    Ok(Json(ctx.library.list_images(&query).await?))
}

async fn upload_image(
    ctx: Extension<ApiContext>,
    mut multipart: Multipart,
) -> Result<Json<Mutation<ImageRecord>>> {
    let mut file = None;
    let mut name = String::new();
    let mut matte = Matte::None;
    let mut filter = PhotoFilter::None;
    let mut tags = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                let filename = field.file_name()
                    .ok_or(ApiError::unprocessable_entity([("file", "filename is empty")]))?
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?.to_vec();
                file = Some((filename, data));
            }
            "name" => name = field.text().await.map_err(multipart_error)?,
            "matte" => {
                let value = field.text().await.map_err(multipart_error)?.trim().to_lowercase();
                if !value.is_empty() {
                    matte = Matte::from(value);
                }
            }
            "filter" => {
                let value = field.text().await.map_err(multipart_error)?.trim().to_lowercase();
                if !value.is_empty() {
                    filter = PhotoFilter::from(value);
                }
            }
            "tags" => tags = split_tags(&field.text().await.map_err(multipart_error)?),
            _ => {}
        }
    }

    let (original_filename, bytes) = file.ok_or(ApiError::unprocessable_entity([("file", "missing file")]))?;
    let upload = Upload { bytes, original_filename, name, matte, filter, tags };
    let (record, changes) = ctx.library.upload(upload).await?;
    Ok(Json(ctx.publish(record, changes).await))
}

async fn get_image(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
) -> Result<Json<ImageRecord>> {
    Ok(Json(ctx.library.get_image(&filename).await?))
}

async fn update_image(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
    Json(update): Json<ImageUpdate>,
) -> Result<Json<Mutation<ImageRecord>>> {
    let (record, changes) = ctx.library.update_image(&filename, update).await?;
    Ok(Json(ctx.publish(record, changes).await))
}

async fn delete_image(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
) -> Result<Json<Mutation<Deleted>>> {
    let changes = ctx.library.delete(&filename).await?;
    Ok(Json(ctx.publish(Deleted { filename }, changes).await))
}

async fn rename_image(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
    Json(req): Json<RenameBody>,
) -> Result<Json<Mutation<ImageRecord>>> {
    let (record, changes) = ctx.library.rename(&filename, &req.name).await?;
    Ok(Json(ctx.publish(record, changes).await))
}

async fn bulk_tag(
    ctx: Extension<ApiContext>,
    Json(req): Json<BulkTagBody>,
) -> Result<Json<Mutation<BulkTagReport>>> {
    let (report, changes) = ctx.library.bulk_tag(&req.filenames, &req.tags).await?;
    Ok(Json(ctx.publish(report, changes).await))
}

async fn get_thumbnail(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let path = ctx.library.thumbnail_path(&filename)?;
    if !path.is_file() {
        return Err(LibraryError::not_found(format!("thumbnail of '{filename}'")).into());
    }
    stream_file(&path).await
}

async fn get_file(
    ctx: Extension<ApiContext>,
    Path(filename): Path<String>,
) -> Result<Response> {
    ctx.library.get_image(&filename).await?;
    stream_file(&ctx.library.library_path(&filename)?).await
}
