use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use super::reshape::{prepare_chat_request, PreparedChatRequest};
use crate::error::RelayError;
use crate::observability::log_request_complete;
use crate::protocol::openai_chat::response_encoder::{transform_completion_body, ResponseIdentity};
use crate::state::AppState;
use crate::stream::{transform_event_stream, StreamSession};
use crate::transport::upstream_error_from_response;
use crate::util::unix_now_secs;

/// `POST /v1/chat/completions`.
pub async fn handler(state: Arc<AppState>, headers: HeaderMap, body: bytes::Bytes) -> Response {
    match handler_inner(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => {
            tracing::debug!(error = %err, "chat completion rejected");
            err.into_response()
        }
    }
}

async fn handler_inner(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, RelayError> {
    state.authenticate(headers)?;
    let request = prepare_chat_request(body, &state.upstream)?;
    let start_time = Instant::now();

    let response = state
        .transport
        .post_json(state.upstream.chat_url(), state.upstream.headers(), request.body.clone())
        .await?;
    if !response.status().is_success() {
        return Err(upstream_error_from_response(response).await);
    }

    if request.stream {
        Ok(stream_response(state, &request, response))
    } else {
        non_stream_response(state, &request, response, start_time).await
    }
}

fn stream_response(
    state: &AppState,
    request: &PreparedChatRequest,
    upstream: reqwest::Response,
) -> Response {
    let session = StreamSession::new(
        state.next_completion_id(),
        unix_now_secs(),
        request.model.clone(),
        state.cot_mode().clone(),
    );
    tracing::debug!(id = session.id(), model = %request.model, "streaming chat completion");
    let frames = transform_event_stream(upstream.bytes_stream(), session);
    sse_ok_response(Body::from_stream(frames))
}

async fn non_stream_response(
    state: &AppState,
    request: &PreparedChatRequest,
    upstream: reqwest::Response,
    start_time: Instant,
) -> Result<Response, RelayError> {
    let body = upstream
        .bytes()
        .await
        .map_err(|e| RelayError::Transport(format!("Failed to read response body: {e}")))?;
    let identity = ResponseIdentity {
        id: state.next_completion_id(),
        created: unix_now_secs(),
        model: request.model.clone(),
    };
    let (encoded, completion) = transform_completion_body(&body, &identity, state.cot_mode())?;
    log_request_complete(&request.model, false, Some(&completion.usage), start_time);
    Ok(ok_json_response(encoded))
}

#[inline]
fn ok_json_response(body_bytes: bytes::Bytes) -> Response {
    let mut response = Response::new(Body::from(body_bytes));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

#[inline]
fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
