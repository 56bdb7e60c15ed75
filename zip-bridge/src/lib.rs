//! HTTP surface over the fileset store: ZIP uploads in, objects,
//! manifests and refs out.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use zipset_store::{FilesetStore, Limits};

mod docs;
mod filesets;
mod objects;
mod refs;

#[derive(Clone)]
pub struct AppState {
    store: Arc<FilesetStore>,
    limits: Limits,
    keep_spool: bool,
}

impl AppState {
    pub fn new(store: Arc<FilesetStore>, limits: Limits, keep_spool: bool) -> Self {
        Self {
            store,
            limits,
            keep_spool,
        }
    }
}

pub fn gen_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/filesets", post(filesets::create))
        .route("/filesets/", get(missing_id))
        .route("/filesets/:id", get(filesets::get))
        .route("/objects/", get(missing_id))
        .route("/objects/:sha", get(objects::get))
        .route("/refs/", get(missing_id))
        .route("/refs/:name", get(refs::get))
        .route("/openapi.yaml", get(docs::openapi_yaml))
        .route("/openapi.json", get(docs::openapi_json))
        .route("/apidocs", get(docs::apidocs))
}

async fn health() -> &'static str {
    "ok"
}

/// `GET /filesets/` and friends: the id segment is required.
async fn missing_id() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "Missing identifier")
}

/// Quoted ETag for a content-addressed resource.
pub(crate) fn etag_for(hex_id: &str) -> String {
    format!("\"sha256:{hex_id}\"")
}
