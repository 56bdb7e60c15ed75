//! Static documentation assets, baked into the binary.

use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse};

const OPENAPI_YAML: &str = include_str!("../openapi.yaml");
const OPENAPI_JSON: &str = include_str!("../openapi.json");
const APIDOCS_HTML: &str = include_str!("../apidocs.html");

pub(crate) async fn openapi_yaml() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/yaml")], OPENAPI_YAML)
}

pub(crate) async fn openapi_json() -> impl IntoResponse {
    ([(CONTENT_TYPE, "application/json")], OPENAPI_JSON)
}

pub(crate) async fn apidocs() -> Html<&'static str> {
    Html(APIDOCS_HTML)
}
