//! Retrieval of stored objects, served in their Brotli form.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT_ENCODING, IF_NONE_MATCH};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use tokio_util::io::ReaderStream;
use tracing::{instrument, warn};

use crate::{etag_for, AppState};

#[instrument(skip(state, headers))]
pub(crate) async fn get(
    Path(sha): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let file = state
        .store
        .open_object(&sha)
        .await
        .map_err(|e| {
            warn!(err=%e, "failed to open object");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let etag = etag_for(&sha);
    if if_none_match_hits(&headers, &etag) {
        return Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header("etag", etag)
            .body(Body::empty())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR);
    }

    // objects only exist in Brotli form; a client that rules out `br`
    // cannot be served
    if !accepts_brotli(&headers) {
        return Response::builder()
            .status(StatusCode::NOT_ACCEPTABLE)
            .body(Body::from("Not Acceptable (need br)"))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR);
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/octet-stream")
        .header("content-encoding", "br")
        .header("etag", etag)
        .header("cache-control", "public, max-age=31536000, immutable")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn if_none_match_hits(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|list| list.split(',').any(|candidate| candidate.trim() == etag))
        .unwrap_or(false)
}

/// Absent `Accept-Encoding` means no preference. When present it must
/// admit `br` (or a wildcard) for the stored representation to be usable.
fn accepts_brotli(headers: &HeaderMap) -> bool {
    match headers.get(ACCEPT_ENCODING).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(list) => list.split(',').any(|part| {
            let coding = part.split(';').next().unwrap_or("").trim();
            coding.eq_ignore_ascii_case("br") || coding == "*"
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str, name: axum::http::HeaderName) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn accept_encoding_rules() {
        assert!(accepts_brotli(&HeaderMap::new()));
        assert!(accepts_brotli(&headers_with("br", ACCEPT_ENCODING)));
        assert!(accepts_brotli(&headers_with(
            "gzip, br;q=0.8",
            ACCEPT_ENCODING
        )));
        assert!(accepts_brotli(&headers_with("*", ACCEPT_ENCODING)));
        assert!(!accepts_brotli(&headers_with("identity", ACCEPT_ENCODING)));
        assert!(!accepts_brotli(&headers_with(
            "gzip, deflate",
            ACCEPT_ENCODING
        )));
    }

    #[test]
    fn if_none_match_comma_lists() {
        let etag = "\"sha256:abcd\"";
        assert!(if_none_match_hits(
            &headers_with("\"sha256:abcd\"", IF_NONE_MATCH),
            etag
        ));
        assert!(if_none_match_hits(
            &headers_with("\"x\", \"sha256:abcd\" , \"y\"", IF_NONE_MATCH),
            etag
        ));
        assert!(!if_none_match_hits(
            &headers_with("\"sha256:other\"", IF_NONE_MATCH),
            etag
        ));
        assert!(!if_none_match_hits(&HeaderMap::new(), etag));
    }
}
