//! Named refs: tiny text pointers to fileset ids.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::{instrument, warn};

use crate::AppState;

#[instrument(skip(state))]
pub(crate) async fn get(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    state
        .store
        .read_ref(&name)
        .await
        .map_err(|e| {
            warn!(err=%e, "failed to read ref");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)
}
