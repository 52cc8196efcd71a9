use bytes::Bytes;

use crate::util::{push_json_string_escaped, push_u64_decimal};

const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Encodes `chat.completion.chunk` frames for one stream.
///
/// Identity (id, created, model) is fixed at construction so every frame of
/// a response carries the same values.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    id: String,
    created: u64,
    model: String,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(id: impl Into<String>, created: u64, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created,
            model: model.into(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// `delta: {"role": "assistant"}` announcement.
    #[must_use]
    pub fn role_frame(&self) -> Bytes {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n");
        Bytes::from(out)
    }

    /// `delta: {"content": text}` frame.
    #[must_use]
    pub fn content_frame(&self, text: &str) -> Bytes {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len() + text.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{\"content\":");
        push_json_string_escaped(&mut out, text);
        out.push_str("},\"finish_reason\":null}]}\n\n");
        Bytes::from(out)
    }

    /// Delta-less frame carrying the terminal reason code.
    #[must_use]
    pub fn finish_frame(&self, reason: &str) -> Bytes {
        let mut out = String::with_capacity(160 + self.id.len() + self.model.len() + reason.len());
        self.push_prefix(&mut out);
        out.push_str(",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":");
        push_json_string_escaped(&mut out, reason);
        out.push_str("}]}\n\n");
        Bytes::from(out)
    }

    #[must_use]
    pub fn done_frame() -> Bytes {
        Bytes::from_static(DONE_FRAME.as_bytes())
    }

    fn push_prefix(&self, out: &mut String) {
        out.push_str("data: {\"id\":");
        push_json_string_escaped(out, &self.id);
        out.push_str(",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(out, self.created);
        out.push_str(",\"model\":");
        push_json_string_escaped(out, &self.model);
    }
}
