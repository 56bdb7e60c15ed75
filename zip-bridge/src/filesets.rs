//! Upload and retrieval of filesets.

use std::io;

use axum::extract::{Path, Query, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE, ETAG, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use zipset_store::{ingest_zip, Manifest};

use crate::{etag_for, AppState};

#[derive(Debug, Deserialize)]
pub(crate) struct CreateParams {
    /// Ref to point at the new fileset; defaults to `latest`, empty
    /// disables the update.
    update_ref: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse<'a> {
    fileset_id: &'a str,
    updated_ref: Option<&'a str>,
    manifest: &'a Manifest,
}

#[instrument(skip(state, headers, request), fields(fileset.id))]
pub(crate) async fn create(
    State(state): State<AppState>,
    Query(params): Query<CreateParams>,
    headers: HeaderMap,
    request: axum::extract::Request,
) -> Response {
    if !content_type_is_zip(&headers) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Expected Content-Type: application/zip",
        )
            .into_response();
    }

    let update_ref = match params.update_ref.as_deref() {
        None => Some("latest"),
        Some("") => None,
        Some(name) => Some(name),
    };

    let body = request.into_body().into_data_stream().map_err(|e| {
        warn!(err=%e, "failed to read request body");
        io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())
    });

    let outcome = match ingest_zip(
        &state.store,
        body,
        &state.limits,
        update_ref,
        state.keep_spool,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(err=%e, "ingest failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    tracing::Span::current().record("fileset.id", outcome.fileset_id.as_str());
    let location = format!("/filesets/{}", outcome.fileset_id);

    if accepts_json(&headers) {
        (
            StatusCode::CREATED,
            [(LOCATION, location)],
            Json(CreateResponse {
                fileset_id: &outcome.fileset_id,
                updated_ref: outcome.updated_ref.as_deref(),
                manifest: &outcome.manifest,
            }),
        )
            .into_response()
    } else {
        (
            StatusCode::CREATED,
            [(LOCATION, location)],
            outcome.fileset_id,
        )
            .into_response()
    }
}

#[instrument(skip(state))]
pub(crate) async fn get(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Response, StatusCode> {
    let body = state
        .store
        .read_manifest_bytes(&id)
        .await
        .map_err(|e| {
            warn!(err=%e, "failed to read manifest");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        [
            (CONTENT_TYPE, "application/json".to_string()),
            (ETAG, etag_for(&id)),
        ],
        body,
    )
        .into_response())
}

fn content_type_is_zip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .is_some_and(|essence| essence.eq_ignore_ascii_case("application/zip"))
}

/// The create response is JSON when the client accepts `application/json`
/// or anything (`*/*`); otherwise it degrades to the bare id as text.
fn accepts_json(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| {
            accept.split(',').any(|part| {
                let essence = part.split(';').next().unwrap_or("").trim();
                essence.eq_ignore_ascii_case("application/json") || essence == "*/*"
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: axum::http::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn content_type_matching() {
        assert!(content_type_is_zip(&headers_with(
            CONTENT_TYPE,
            "application/zip"
        )));
        assert!(content_type_is_zip(&headers_with(
            CONTENT_TYPE,
            "Application/ZIP; boundary=x"
        )));
        assert!(!content_type_is_zip(&headers_with(
            CONTENT_TYPE,
            "application/octet-stream"
        )));
        assert!(!content_type_is_zip(&HeaderMap::new()));
    }

    #[test]
    fn accept_negotiation() {
        assert!(accepts_json(&headers_with(ACCEPT, "application/json")));
        assert!(accepts_json(&headers_with(ACCEPT, "*/*")));
        assert!(accepts_json(&headers_with(
            ACCEPT,
            "text/html, application/json;q=0.9"
        )));
        assert!(!accepts_json(&headers_with(ACCEPT, "text/plain")));
        assert!(!accepts_json(&HeaderMap::new()));
    }
}
