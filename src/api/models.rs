use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::Value;

use crate::state::AppState;

/// `GET /v1/models`: relay the upstream model list.
///
/// The upstream status and body are passed through unchanged. When the
/// upstream cannot be reached, a local list naming the configured model is
/// returned instead.
pub async fn handler(state: Arc<AppState>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return err.into_response();
    }

    let upstream = &state.upstream;
    let fetched = match state
        .transport
        .get(upstream.models_url(), upstream.headers())
        .await
    {
        Ok(response) => {
            let status = response.status();
            let content_type = response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| http::HeaderValue::from_static("application/json"));
            response
                .bytes()
                .await
                .map(|body| (status, content_type, body))
                .map_err(|err| err.to_string())
        }
        Err(err) => Err(err.to_string()),
    };

    match fetched {
        Ok((status, content_type, body)) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(http::header::CONTENT_TYPE, content_type);
            response
        }
        Err(err) => {
            tracing::warn!(error = %err, "model list unavailable upstream, serving local list");
            (
                StatusCode::OK,
                [(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/json"),
                )],
                Body::from(fallback_models_body(upstream.model())),
            )
                .into_response()
        }
    }
}

/// `{"object":"list","data":[...]}` with the configured model, if any.
#[must_use]
pub fn fallback_models_body(model: &str) -> Bytes {
    let models: Vec<Value> = if model.is_empty() {
        Vec::new()
    } else {
        vec![serde_json::json!({
            "id": model,
            "object": "model",
            "created": 1_677_610_602,
            "owned_by": "cot-relay",
        })]
    };
    let payload = serde_json::json!({
        "object": "list",
        "data": models,
    });
    serde_json::to_vec(&payload).map_or_else(
        |_| Bytes::from_static(br#"{"object":"list","data":[]}"#),
        Bytes::from,
    )
}
