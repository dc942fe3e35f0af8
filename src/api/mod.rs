use std::path::Path;
use std::sync::Arc;
use anyhow::Context;
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
pub use error::ApiError;
use crate::config::Config;
use crate::git::{PushOutcome, SyncEngine};
use crate::library::{ChangeSet, Library};

mod error;
mod images;
mod ping;
mod sync;
mod tags;
mod tvs;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[derive(Clone)]
pub struct ApiContext {
    pub cfg: Arc<Config>,
    pub library: Arc<Library>,
    pub sync: SyncEngine,
}

/// Result of a mutating call, with what it changed and, under auto-push,
/// how publishing those changes went.
#[derive(Serialize)]
pub struct Mutation<T> {
    pub result: T,
    pub changes: ChangeSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncReport>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncReport {
    Published { outcome: PushOutcome },
    Failed { error: &'static str, message: String },
}

impl ApiContext {
    pub fn new(cfg: Config, library: Library, sync: SyncEngine) -> Self {
        Self { cfg: Arc::new(cfg), library: Arc::new(library), sync }
    }

    /// Commits and pushes `changes` when auto-push is on. The operation has
    /// already been applied, so a failure here is reported, not returned.
    pub async fn publish<T>(&self, result: T, changes: ChangeSet) -> Mutation<T> {
        if !self.cfg.sync.auto_push || changes.is_empty() {
            return Mutation { result, changes, sync: None };
        }
        let report = match self.sync.commit_and_push(changes.files.clone(), None).await {
            Ok(outcome) => SyncReport::Published { outcome },
            Err(e) => {
                warn!("auto-push after '{}' failed: {}", changes.description, e);
                SyncReport::Failed { error: e.kind(), message: e.to_string() }
            }
        };
        Mutation { result, changes, sync: Some(report) }
    }
}

pub async fn serve(ctx: ApiContext) -> anyhow::Result<()> {
    let addr = ctx.cfg.api.listen;
    let app = api_router()
        .layer(CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(ctx))
                .layer(TraceLayer::new_for_http()),
    );

    let listener = tokio::net::TcpListener::bind(addr).await
        .with_context(|| format!("cannot bind to {addr}"))?;
    info!("listening on {}", &addr);
    axum::serve(listener, app)
        .await
        .context("error running HTTP server")
}

fn api_router() -> Router {
    ping::router()
        .merge(images::router())
        .merge(tags::router())
        .merge(tvs::router())
        .merge(sync::router())
}

/// Streams a file with a content type guessed from its name.
async fn stream_file(path: &Path) -> Result<Response> {
    let file = tokio::fs::File::open(path).await?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let stream = tokio_util::io::ReaderStream::new(file);
    Ok(([(header::CONTENT_TYPE, mime.to_string())], Body::from_stream(stream)).into_response())
}
