pub mod sse;
pub mod transcoder;

pub use sse::{decoded_event_stream, FrameDecoder};
pub use transcoder::{transform_event_stream, StreamSession};

use crate::protocol::openai_chat::UpstreamStreamChunk;

/// One decoded upstream payload: a content fragment and/or a terminal reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedEvent {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl DecodedEvent {
    /// Reduce an upstream chunk to its first choice.
    ///
    /// Returns `None` when the chunk carries neither content nor a reason
    /// (role announcements, keep-alives, usage-only chunks).
    #[must_use]
    pub fn from_chunk(chunk: UpstreamStreamChunk) -> Option<Self> {
        let choice = chunk.choices.into_iter().next()?;
        let content = choice
            .delta
            .and_then(|delta| delta.content)
            .filter(|text| !text.is_empty());
        let finish_reason = choice.finish_reason.filter(|reason| !reason.is_empty());
        if content.is_none() && finish_reason.is_none() {
            return None;
        }
        Some(Self {
            content,
            finish_reason,
        })
    }
}
