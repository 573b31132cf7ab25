use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use relay_core::errors::GatewayError;

use crate::server::AppState;

/// Forward an `/api/*` request to the backend, preserving method, path,
/// query and (for non-GET/HEAD) body, and relay the backend's status code and
/// JSON body unmodified.
///
/// Errors collapse to a generic 500: backend detail never reaches the caller.
/// No retry and no timeout beyond the transport default.
pub async fn proxy_api(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    match forward(&state, method, &path, query.as_deref(), body).await {
        Ok((status, value)) => (status, Json(value)).into_response(),
        Err(err) => {
            tracing::error!(kind = err.error_kind(), error = %err, path = %path, "api proxy error");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err.client_payload())).into_response()
        }
    }
}

async fn forward(
    state: &AppState,
    method: Method,
    path: &str,
    query: Option<&str>,
    body: Bytes,
) -> Result<(StatusCode, serde_json::Value), GatewayError> {
    let url = target_url(&state.backend_base, path, query);

    let mut request = state.http.request(method.clone(), &url);
    if method != Method::GET && method != Method::HEAD {
        request = request
            .header("content-type", "application/json")
            .body(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::BackendUnreachable(e.to_string()))?;

    let status = response.status();
    let value: serde_json::Value = response
        .json()
        .await
        .map_err(|_| GatewayError::MalformedBackendResponse)?;

    Ok((status, value))
}

/// Target URL for a proxied request. The path is relayed verbatim — no
/// trailing-slash normalization.
fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{base}/api/{path}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}
