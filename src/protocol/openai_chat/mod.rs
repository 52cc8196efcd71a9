pub mod response_encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Upstream (inbound) shapes, decoded leniently
// ---------------------------------------------------------------------------

/// One upstream streaming payload (`data: {...}`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamStreamChunk {
    #[serde(default)]
    pub choices: Vec<UpstreamStreamChoice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamStreamChoice {
    #[serde(default)]
    pub delta: Option<UpstreamDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// A complete upstream (non-streaming) completion body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamCompletion {
    #[serde(default)]
    pub choices: Vec<UpstreamChoice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamChoice {
    #[serde(default)]
    pub message: Option<UpstreamMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamMessage {
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

impl UpstreamMessage {
    /// Message text; array content is flattened by joining its text parts.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.content {
            Some(serde_json::Value::String(text)) => text.clone(),
            Some(serde_json::Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
                .collect(),
            _ => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Downstream (outbound) shapes
// ---------------------------------------------------------------------------

/// `chat.completion` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

/// `chat.completion.chunk` frame body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_chunk_is_lenient() {
        let chunk: UpstreamStreamChunk =
            serde_json::from_str(r#"{"id":"x","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#)
                .unwrap();
        assert_eq!(chunk.choices.len(), 1);
        assert!(chunk.choices[0].delta.as_ref().unwrap().content.is_none());

        let empty: UpstreamStreamChunk = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn test_message_text_from_parts() {
        let message: UpstreamMessage = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "[plan]"},
                {"type": "image_url", "image_url": {"url": "https://x"}},
                {"type": "text", "text": "answer"}
            ]
        }))
        .unwrap();
        assert_eq!(message.text(), "[plan]answer");
    }

    #[test]
    fn test_message_text_null() {
        let message: UpstreamMessage =
            serde_json::from_value(serde_json::json!({"content": null})).unwrap();
        assert_eq!(message.text(), "");
    }
}
