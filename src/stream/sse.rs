//! Incremental decoder for the upstream event stream.
//!
//! Raw body chunks may split lines and multi-byte characters anywhere. Only
//! `data:` lines are relevant; each one carries a complete JSON payload.
use futures_util::{Stream, StreamExt};
use memchr::memchr_iter;

use super::DecodedEvent;
use crate::error::RelayError;
use crate::protocol::openai_chat::UpstreamStreamChunk;

const DATA_PREFIX: &str = "data:";
const UPSTREAM_DONE: &str = "[DONE]";

/// Line-oriented decoder turning body bytes into [`DecodedEvent`]s.
///
/// Bytes are consumed exactly once: complete lines are parsed and dropped,
/// an incomplete trailing line and any incomplete UTF-8 sequence are kept
/// for the next chunk.
pub struct FrameDecoder {
    buffer: String,
    read_offset: usize,
    utf8_remainder: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            utf8_remainder: Vec::new(),
        }
    }

    /// Feed one raw chunk and append any decoded events to `out`.
    pub fn feed_bytes(&mut self, bytes: &[u8], out: &mut Vec<DecodedEvent>) {
        if self.utf8_remainder.is_empty() {
            match std::str::from_utf8(bytes) {
                Ok(text) => self.feed_str(text, out),
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    let (valid, rest) = bytes.split_at(valid_up_to);
                    self.feed_str(&String::from_utf8_lossy(valid), out);
                    self.utf8_remainder.extend_from_slice(rest);
                    self.repair_invalid_remainder(out);
                }
            }
            return;
        }

        self.utf8_remainder.extend_from_slice(bytes);
        let pending = std::mem::take(&mut self.utf8_remainder);
        match std::str::from_utf8(&pending) {
            Ok(text) => self.feed_str(text, out),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                let (valid, rest) = pending.split_at(valid_up_to);
                self.feed_str(&String::from_utf8_lossy(valid), out);
                self.utf8_remainder.extend_from_slice(rest);
                self.repair_invalid_remainder(out);
            }
        }
    }

    /// Flush an unterminated final line once the body has ended.
    pub fn finish(&mut self, out: &mut Vec<DecodedEvent>) {
        if !self.utf8_remainder.is_empty() {
            let rest = std::mem::take(&mut self.utf8_remainder);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        if self.read_offset < self.buffer.len() {
            let line = self.buffer[self.read_offset..].to_string();
            process_line(&line, out);
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    // A remainder that can never become valid UTF-8 (not just a truncated
    // sequence) is replaced instead of being held forever.
    fn repair_invalid_remainder(&mut self, out: &mut Vec<DecodedEvent>) {
        if let Err(e) = std::str::from_utf8(&self.utf8_remainder) {
            if e.error_len().is_some() {
                let rest = std::mem::take(&mut self.utf8_remainder);
                self.feed_str(&String::from_utf8_lossy(&rest), out);
            }
        }
    }

    fn feed_str(&mut self, chunk: &str, out: &mut Vec<DecodedEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let bytes = self.buffer.as_bytes();
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn process_line(line: &str, out: &mut Vec<DecodedEvent>) {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == UPSTREAM_DONE {
        return;
    }
    match serde_json::from_str::<UpstreamStreamChunk>(payload) {
        Ok(chunk) => {
            if let Some(event) = DecodedEvent::from_chunk(chunk) {
                out.push(event);
            }
        }
        Err(err) => {
            tracing::debug!(error = %err, payload_len = payload.len(), "skipping malformed upstream payload");
        }
    }
}

/// Lazily decode an upstream body stream into [`DecodedEvent`]s.
///
/// Events come out in arrival order. A body read error is yielded once as
/// `Err` and ends the sequence.
pub fn decoded_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<DecodedEvent, RelayError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            FrameDecoder::new(),
            Vec::<DecodedEvent>::with_capacity(8),
            0usize,
            false,
        ),
        |(mut stream, mut decoder, mut pending, mut head, mut finished)| async move {
            loop {
                if head < pending.len() {
                    let event = std::mem::take(&mut pending[head]);
                    head += 1;
                    if head == pending.len() {
                        pending.clear();
                        head = 0;
                    }
                    return Some((Ok(event), (stream, decoder, pending, head, finished)));
                }
                if finished {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => decoder.feed_bytes(&bytes, &mut pending),
                    Some(Err(err)) => {
                        finished = true;
                        let err = RelayError::Transport(format!("Upstream stream read failed: {err}"));
                        return Some((Err(err), (stream, decoder, pending, head, finished)));
                    }
                    None => {
                        decoder.finish(&mut pending);
                        finished = true;
                    }
                }
            }
        },
    )
}

/// Format an SSE `data:` frame around a JSON payload.
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn content_line(text: &str) -> String {
        let payload = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        });
        openai_sse_frame(&payload.to_string())
    }

    fn contents(events: &[DecodedEvent]) -> Vec<&str> {
        events.iter().filter_map(|e| e.content.as_deref()).collect()
    }

    #[test]
    fn test_decode_single_line() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.feed_bytes(content_line("Hi").as_bytes(), &mut out);
        assert_eq!(contents(&out), vec!["Hi"]);
    }

    #[test]
    fn test_partial_line_across_chunks() {
        let line = content_line("hello");
        let (a, b) = line.split_at(17);
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.feed_bytes(a.as_bytes(), &mut out);
        assert!(out.is_empty());
        decoder.feed_bytes(b.as_bytes(), &mut out);
        assert_eq!(contents(&out), vec!["hello"]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let line = content_line("思考");
        let bytes = line.as_bytes();
        let split = line.find('思').unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.feed_bytes(&bytes[..split], &mut out);
        decoder.feed_bytes(&bytes[split..split + 1], &mut out);
        decoder.feed_bytes(&bytes[split + 1..], &mut out);
        assert_eq!(contents(&out), vec!["思考"]);
    }

    #[test]
    fn test_every_byte_split_decodes_identically() {
        let body = format!("{}{}data: [DONE]\n\n", content_line("[é]"), content_line("ok"));
        let bytes = body.as_bytes();
        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();
            decoder.feed_bytes(&bytes[..split], &mut out);
            decoder.feed_bytes(&bytes[split..], &mut out);
            decoder.finish(&mut out);
            assert_eq!(contents(&out), vec!["[é]", "ok"], "split at {split}");
        }
    }

    #[test]
    fn test_done_and_non_data_lines_ignored() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        let body = ": keep-alive\nevent: ping\nid: 3\ndata: [DONE]\n\n";
        decoder.feed_bytes(body.as_bytes(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_skipped() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        let body = format!("data: {{not json\n\n{}", content_line("after"));
        decoder.feed_bytes(body.as_bytes(), &mut out);
        assert_eq!(contents(&out), vec!["after"]);
    }

    #[test]
    fn test_data_without_space_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.feed_bytes(
            b"data:{\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\r\n\r\n",
            &mut out,
        );
        assert_eq!(contents(&out), vec!["x"]);
    }

    #[test]
    fn test_finish_reason_event() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        decoder.feed_bytes(
            b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].content.is_none());
        assert_eq!(out[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_unterminated_final_line_flushed_on_finish() {
        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        let line = content_line("tail");
        decoder.feed_bytes(line.trim_end().as_bytes(), &mut out);
        assert!(out.is_empty());
        decoder.finish(&mut out);
        assert_eq!(contents(&out), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_stream_yields_events_then_error() {
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, String>(Bytes::from(content_line("a"))),
            Err("connection reset".to_string()),
            Ok(Bytes::from(content_line("never"))),
        ]);
        let items: Vec<_> = decoded_event_stream(source).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("a"));
        assert!(matches!(&items[1], Err(RelayError::Transport(msg)) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_stream_many_events_in_one_chunk_keep_order() {
        let body = format!(
            "{}{}{}",
            content_line("1"),
            content_line("2"),
            content_line("3")
        );
        let source =
            futures_util::stream::iter(vec![Ok::<Bytes, String>(Bytes::from(body))]);
        let items: Vec<_> = decoded_event_stream(source).collect().await;
        let texts: Vec<String> = items
            .into_iter()
            .map(|item| item.unwrap().content.unwrap())
            .collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }
}
