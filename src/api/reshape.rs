//! Validation and reshaping of client chat requests before forwarding.
use serde_json::{Map, Value};

use crate::error::RelayError;
use crate::transport::PreparedUpstream;

/// A validated request body ready to send upstream.
#[derive(Debug, Clone)]
pub struct PreparedChatRequest {
    pub body: bytes::Bytes,
    /// Model the upstream call targets; also reported downstream.
    pub model: String,
    pub stream: bool,
}

/// Validate a client body and rewrite it for the upstream service.
///
/// # Errors
///
/// Returns [`RelayError::InvalidRequest`] when the body is not a JSON object,
/// `messages` is missing or empty, no model can be resolved, or the request
/// carries image parts the upstream cannot accept.
pub fn prepare_chat_request(
    body: &[u8],
    upstream: &PreparedUpstream,
) -> Result<PreparedChatRequest, RelayError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid JSON body: {e}")))?;
    let Value::Object(mut request) = value else {
        return Err(RelayError::InvalidRequest(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let has_images = normalize_messages(&mut request)?;
    if has_images && !upstream.supports_images() {
        return Err(RelayError::InvalidRequest(
            "Image content is not supported by the configured upstream model".to_string(),
        ));
    }

    let model = resolve_model(&request, upstream.model())?;
    request.insert("model".to_string(), Value::String(model.clone()));

    let stream = matches!(request.get("stream"), Some(Value::Bool(true)));
    request.insert("stream".to_string(), Value::Bool(stream));

    let body = serde_json::to_vec(&request)
        .map(bytes::Bytes::from)
        .map_err(|e| RelayError::Internal(format!("Serialization error: {e}")))?;
    Ok(PreparedChatRequest {
        body,
        model,
        stream,
    })
}

fn resolve_model(request: &Map<String, Value>, configured: &str) -> Result<String, RelayError> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    match request.get("model").and_then(Value::as_str).map(str::trim) {
        Some(model) if !model.is_empty() => Ok(model.to_string()),
        _ => Err(RelayError::InvalidRequest("model is required".to_string())),
    }
}

// Returns whether any image part was seen.
fn normalize_messages(request: &mut Map<String, Value>) -> Result<bool, RelayError> {
    let Some(Value::Array(messages)) = request.get_mut("messages") else {
        return Err(RelayError::InvalidRequest(
            "messages must be a non-empty array".to_string(),
        ));
    };
    if messages.is_empty() {
        return Err(RelayError::InvalidRequest(
            "messages must be a non-empty array".to_string(),
        ));
    }

    let mut has_images = false;
    for (index, message) in messages.iter_mut().enumerate() {
        let Some(message) = message.as_object_mut() else {
            return Err(RelayError::InvalidRequest(format!(
                "messages[{index}] must be an object"
            )));
        };
        let Some(Value::Array(parts)) = message.get_mut("content") else {
            continue;
        };
        for part in parts.iter_mut().filter_map(Value::as_object_mut) {
            let is_image = part.get("type").and_then(Value::as_str) == Some("image_url")
                || part.contains_key("image_url");
            if !is_image {
                continue;
            }
            has_images = true;
            if let Some(Value::String(url)) = part.get("image_url") {
                let url = url.clone();
                part.insert("image_url".to_string(), serde_json::json!({ "url": url }));
            }
        }
    }
    Ok(has_images)
}
