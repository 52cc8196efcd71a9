use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use smallvec::SmallVec;

use super::{decoded_event_stream, DecodedEvent};
use crate::cot::{CotExtractor, CotMode};
use crate::error::RelayError;
use crate::observability::log_request_complete;
use crate::protocol::openai_chat::stream::ChunkEncoder;

/// Per-request streaming state.
///
/// Owned by exactly one response pipeline and dropped with it; nothing here
/// is shared between requests.
#[derive(Debug)]
pub struct StreamSession {
    encoder: ChunkEncoder,
    cot: CotExtractor,
    role_sent: bool,
    done: bool,
    started_at: Instant,
}

impl StreamSession {
    #[must_use]
    pub fn new(id: impl Into<String>, created: u64, model: impl Into<String>, mode: CotMode) -> Self {
        Self {
            encoder: ChunkEncoder::new(id, created, model),
            cot: CotExtractor::new(mode),
            role_sent: false,
            done: false,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.encoder.id()
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.encoder.created()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.encoder.model()
    }

    #[must_use]
    pub fn cot(&self) -> &CotExtractor {
        &self.cot
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Emit the role announcement if it has not gone out yet.
    pub fn start_into(&mut self, out: &mut Vec<Bytes>) {
        if !self.role_sent {
            self.role_sent = true;
            out.push(self.encoder.role_frame());
        }
    }

    /// Translate one decoded upstream event into outbound frames.
    pub fn on_event(&mut self, event: DecodedEvent, out: &mut Vec<Bytes>) {
        if self.done {
            return;
        }
        self.start_into(out);

        if let Some(content) = event.content.as_deref() {
            if let Some(text) = self.cot.push(content) {
                out.push(self.encoder.content_frame(&text));
            }
        }

        if let Some(reason) = event.finish_reason.as_deref() {
            // Anything still held back must go out before the finish notice.
            if let Some(text) = self.cot.finish() {
                out.push(self.encoder.content_frame(&text));
            }
            out.push(self.encoder.finish_frame(reason));
        }
    }

    /// Release buffered content and emit the terminal `[DONE]` frame once.
    pub fn finish_into(&mut self, out: &mut Vec<Bytes>) {
        if self.done {
            return;
        }
        self.start_into(out);
        if let Some(text) = self.cot.finish() {
            out.push(self.encoder.content_frame(&text));
        }
        out.push(ChunkEncoder::done_frame());
        self.done = true;
        log_request_complete(self.encoder.model(), true, None, self.started_at);
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(
                id = self.encoder.id(),
                "stream dropped before completion; releasing upstream body"
            );
        }
    }
}

struct PendingFrames {
    frames: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingFrames {
    #[inline]
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, produced: &mut Vec<Bytes>) {
        if produced.is_empty() {
            return;
        }
        self.frames.extend(produced.drain(..));
    }
}

/// Transform an upstream body stream into the downstream event stream.
///
/// The output always starts with one role frame and ends with one `[DONE]`
/// frame. When the upstream body fails mid-way, `[DONE]` is still emitted and
/// the failure follows it as the final `Err` item.
pub fn transform_event_stream<S, E>(
    byte_stream: S,
    session: StreamSession,
) -> impl Stream<Item = Result<Bytes, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(decoded_event_stream(byte_stream)),
            session,
            PendingFrames::new(),
            Vec::<Bytes>::with_capacity(4),
            None::<RelayError>,
            false,
        ),
        |(mut events, mut session, mut pending, mut produced, mut deferred_error, mut ended)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((
                        Ok(frame),
                        (events, session, pending, produced, deferred_error, ended),
                    ));
                }
                if let Some(err) = deferred_error.take() {
                    ended = true;
                    return Some((
                        Err(err),
                        (events, session, pending, produced, deferred_error, ended),
                    ));
                }
                if ended {
                    return None;
                }

                if !session.role_sent {
                    session.start_into(&mut produced);
                    pending.extend_from_vec(&mut produced);
                    continue;
                }

                match events.as_mut().next().await {
                    Some(Ok(event)) => session.on_event(event, &mut produced),
                    Some(Err(err)) => {
                        tracing::warn!(id = session.id(), error = %err, "upstream stream failed");
                        session.finish_into(&mut produced);
                        deferred_error = Some(err);
                    }
                    None => {
                        session.finish_into(&mut produced);
                        ended = true;
                    }
                }
                pending.extend_from_vec(&mut produced);
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::openai_chat::ChatCompletionChunk;

    fn content_line(text: &str) -> String {
        let payload = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        });
        format!("data: {payload}\n\n")
    }

    fn finish_line(reason: &str) -> String {
        let payload = serde_json::json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
        });
        format!("data: {payload}\n\n")
    }

    #[derive(Debug, PartialEq)]
    enum Frame {
        Role,
        Content(String),
        Finish(String),
        Done,
    }

    fn classify(frame: &Bytes) -> Frame {
        let text = std::str::from_utf8(frame).unwrap();
        let payload = text.trim_start_matches("data: ").trim();
        if payload == "[DONE]" {
            return Frame::Done;
        }
        let chunk: ChatCompletionChunk = serde_json::from_str(payload).unwrap();
        assert_eq!(chunk.id, "chatcmpl-test");
        assert_eq!(chunk.created, 42);
        assert_eq!(chunk.model, "thinker");
        let choice = &chunk.choices[0];
        if choice.delta.role.is_some() {
            Frame::Role
        } else if let Some(content) = &choice.delta.content {
            Frame::Content(content.clone())
        } else {
            Frame::Finish(choice.finish_reason.clone().unwrap())
        }
    }

    fn session(mode: CotMode) -> StreamSession {
        StreamSession::new("chatcmpl-test", 42, "thinker", mode)
    }

    async fn run(chunks: Vec<Result<Bytes, String>>, mode: CotMode) -> (Vec<Frame>, Option<RelayError>) {
        let items: Vec<_> = transform_event_stream(futures_util::stream::iter(chunks), session(mode))
            .collect()
            .await;
        let mut frames = Vec::new();
        let mut error = None;
        for item in items {
            match item {
                Ok(frame) => {
                    assert!(error.is_none(), "frame after error");
                    frames.push(classify(&frame));
                }
                Err(err) => error = Some(err),
            }
        }
        (frames, error)
    }

    #[tokio::test]
    async fn test_think_stream_frame_order() {
        let body = format!(
            "{}{}{}{}data: [DONE]\n\n",
            content_line("[he"),
            content_line("llo]Hi"),
            content_line(" there"),
            finish_line("stop")
        );
        let (frames, error) = run(vec![Ok(Bytes::from(body))], CotMode::Think).await;
        assert!(error.is_none());
        assert_eq!(
            frames,
            vec![
                Frame::Role,
                Frame::Content("<think>\n\nhello\n\n</think>\n\nHi".to_string()),
                Frame::Content(" there".to_string()),
                Frame::Finish("stop".to_string()),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_short_reply_flushed_before_finish() {
        let body = format!("{}{}", content_line("Just a reply"), finish_line("stop"));
        let (frames, _) = run(vec![Ok(Bytes::from(body))], CotMode::Details).await;
        assert_eq!(
            frames,
            vec![
                Frame::Role,
                Frame::Content("Just a reply".to_string()),
                Frame::Finish("stop".to_string()),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_upstream_still_well_formed() {
        let (frames, error) = run(Vec::new(), CotMode::Think).await;
        assert!(error.is_none());
        assert_eq!(frames, vec![Frame::Role, Frame::Done]);
    }

    #[tokio::test]
    async fn test_read_failure_emits_done_then_error() {
        let chunks = vec![
            Ok(Bytes::from(content_line("partial"))),
            Err("reset by peer".to_string()),
        ];
        let (frames, error) = run(chunks, CotMode::Think).await;
        assert_eq!(
            frames,
            vec![
                Frame::Role,
                Frame::Content("partial".to_string()),
                Frame::Done,
            ]
        );
        assert!(matches!(error, Some(RelayError::Transport(_))));
    }

    #[tokio::test]
    async fn test_reasoning_mode_streams_think_layout() {
        let body = content_line("[plan]answer");
        let (frames, _) = run(vec![Ok(Bytes::from(body))], CotMode::Reasoning).await;
        assert_eq!(
            frames[1],
            Frame::Content("<think>\n\nplan\n\n</think>\n\nanswer".to_string())
        );
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_advance_state() {
        let body = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"[x]\"\n\n{}",
            content_line("No thought here")
        );
        let (frames, _) = run(vec![Ok(Bytes::from(body))], CotMode::Think).await;
        assert_eq!(
            frames,
            vec![
                Frame::Role,
                Frame::Content("No thought here".to_string()),
                Frame::Done,
            ]
        );
    }

    #[test]
    fn test_session_emits_done_once() {
        let mut session = session(CotMode::Think);
        let mut out = Vec::new();
        session.finish_into(&mut out);
        session.finish_into(&mut out);
        session.on_event(
            DecodedEvent {
                content: Some("late".to_string()),
                finish_reason: None,
            },
            &mut out,
        );
        let frames: Vec<Frame> = out.iter().map(classify).collect();
        assert_eq!(frames, vec![Frame::Role, Frame::Done]);
        assert!(session.is_done());
    }

    #[test]
    fn test_content_deltas_are_disjoint() {
        let mut session = session(CotMode::parse("raw"));
        let mut out = Vec::new();
        for piece in ["Just ", "a ", "reply"] {
            session.on_event(
                DecodedEvent {
                    content: Some(piece.to_string()),
                    finish_reason: None,
                },
                &mut out,
            );
        }
        session.finish_into(&mut out);
        let joined: String = out
            .iter()
            .filter_map(|frame| match classify(frame) {
                Frame::Content(text) => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(joined, "Just a reply");
        assert_eq!(session.cot().thought(), None);
    }

    /// Upstream body that serves its chunks and then stays open forever.
    struct OpenUpstream {
        chunks: std::collections::VecDeque<Bytes>,
        polls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
        dropped: std::sync::Arc<std::sync::atomic::AtomicBool>,
    }

    impl Stream for OpenUpstream {
        type Item = Result<Bytes, String>;

        fn poll_next(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<Option<Self::Item>> {
            self.polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match self.chunks.pop_front() {
                Some(chunk) => std::task::Poll::Ready(Some(Ok(chunk))),
                None => std::task::Poll::Pending,
            }
        }
    }

    impl Drop for OpenUpstream {
        fn drop(&mut self) {
            self.dropped.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_downstream_drop_releases_upstream() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
        use std::sync::Arc;

        let polls = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicBool::new(false));
        let upstream = OpenUpstream {
            chunks: [Bytes::from(content_line("[plan]Hello"))].into_iter().collect(),
            polls: Arc::clone(&polls),
            dropped: Arc::clone(&dropped),
        };

        let mut frames = Box::pin(transform_event_stream(upstream, session(CotMode::Think)));
        let role = frames.next().await.unwrap().unwrap();
        assert_eq!(classify(&role), Frame::Role);
        let content = frames.next().await.unwrap().unwrap();
        assert_eq!(
            classify(&content),
            Frame::Content("<think>\n\nplan\n\n</think>\n\nHello".to_string())
        );
        assert!(!dropped.load(Ordering::SeqCst));

        let polls_before_drop = polls.load(Ordering::SeqCst);
        assert!(polls_before_drop >= 1);
        drop(frames);

        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(polls.load(Ordering::SeqCst), polls_before_drop);
    }
}
