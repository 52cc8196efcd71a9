use crate::cot::{extract_and_format, CotMode, Delivery};
use crate::error::RelayError;

use super::{ChatCompletion, CompletionChoice, CompletionMessage, UpstreamCompletion};

/// Identity stamped onto a downstream response.
#[derive(Debug, Clone)]
pub struct ResponseIdentity {
    pub id: String,
    pub created: u64,
    pub model: String,
}

/// Rewrite a complete upstream completion into a downstream `chat.completion`.
///
/// The preamble pattern is applied once over the whole message text; there
/// is no buffer cap since the full text is known.
#[must_use]
pub fn encode_chat_completion(
    upstream: &UpstreamCompletion,
    identity: &ResponseIdentity,
    mode: &CotMode,
) -> ChatCompletion {
    let choice = upstream.choices.first();
    let text = choice
        .and_then(|c| c.message.as_ref())
        .map(super::UpstreamMessage::text)
        .unwrap_or_default();
    let finish_reason = choice
        .and_then(|c| c.finish_reason.clone())
        .unwrap_or_else(|| "stop".to_string());
    let usage = upstream.usage.clone().unwrap_or_else(|| {
        serde_json::json!({
            "prompt_tokens": 0,
            "completion_tokens": 0,
            "total_tokens": 0,
        })
    });

    ChatCompletion {
        id: identity.id.clone(),
        object: "chat.completion".to_string(),
        created: identity.created,
        model: identity.model.clone(),
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant".to_string(),
                content: extract_and_format(mode, Delivery::Complete, &text),
            },
            finish_reason,
        }],
        usage,
    }
}

/// Transform an upstream JSON body into the downstream JSON body.
///
/// # Errors
///
/// Returns [`RelayError::Translation`] when the upstream body is not a JSON
/// completion object or the result cannot be serialized.
pub fn transform_completion_body(
    body: &[u8],
    identity: &ResponseIdentity,
    mode: &CotMode,
) -> Result<(bytes::Bytes, ChatCompletion), RelayError> {
    let upstream: UpstreamCompletion = serde_json::from_slice(body).map_err(|e| {
        RelayError::Translation(format!("Failed to parse upstream completion: {e}"))
    })?;
    let completion = encode_chat_completion(&upstream, identity, mode);
    let encoded = serde_json::to_vec(&completion)
        .map(bytes::Bytes::from)
        .map_err(|e| RelayError::Translation(format!("Serialization error: {e}")))?;
    Ok((encoded, completion))
}
