use super::format::{clean_thought, format_thought, Delivery};
use super::scanner::PreambleScanner;
use super::CotMode;

/// Buffered characters allowed before an unresolved preamble is abandoned.
pub const BUFFER_CAP_CHARS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionState {
    /// Holding content back while it can still turn out to be a preamble.
    Buffering,
    /// A preamble was found and forwarded in formatted form.
    Extracted,
    /// The buffer was released as plain content without a preamble.
    FlushedNoThought,
}

/// Streaming chain-of-thought extraction for a single response.
///
/// Content fragments are held back until the leading preamble is resolved.
/// Once resolved, every later fragment is forwarded verbatim.
#[derive(Debug)]
pub struct CotExtractor {
    mode: CotMode,
    state: ExtractionState,
    buffer: String,
    buffered_chars: usize,
    scanner: PreambleScanner,
    thought: Option<String>,
}

impl CotExtractor {
    #[must_use]
    pub fn new(mode: CotMode) -> Self {
        Self {
            mode,
            state: ExtractionState::Buffering,
            buffer: String::new(),
            buffered_chars: 0,
            scanner: PreambleScanner::new(),
            thought: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> ExtractionState {
        self.state
    }

    /// True once the extraction decision is final.
    #[must_use]
    pub fn is_processed(&self) -> bool {
        self.state != ExtractionState::Buffering
    }

    #[must_use]
    pub fn thought(&self) -> Option<&str> {
        self.thought.as_deref()
    }

    #[must_use]
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Feed one content fragment and return the text to forward, if any.
    ///
    /// Whitespace after `]` is only consumed as far as the buffer reaches when
    /// the preamble resolves; whitespace arriving in a later fragment is forwarded.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if self.is_processed() {
            return non_empty(fragment.to_string());
        }

        self.buffer.push_str(fragment);
        self.buffered_chars += fragment.chars().count();

        if let Some(found) = self.scanner.advance(&self.buffer) {
            let buffer = std::mem::take(&mut self.buffer);
            let raw_thought = &buffer[found.thought];
            let content = &buffer[found.end..];
            let formatted = format_thought(&self.mode, Delivery::Streaming, raw_thought, content);
            self.thought = Some(clean_thought(raw_thought).to_string());
            self.state = ExtractionState::Extracted;
            self.buffered_chars = 0;
            tracing::debug!(mode = %self.mode, "chain-of-thought preamble extracted");
            return non_empty(formatted);
        }

        if self.buffered_chars > BUFFER_CAP_CHARS {
            tracing::debug!(
                buffered_chars = self.buffered_chars,
                "no preamble within buffer cap; flushing as plain content"
            );
            return self.flush();
        }

        None
    }

    /// Resolve a still-buffering extractor at end of content.
    ///
    /// Pending text is released verbatim as plain content.
    pub fn finish(&mut self) -> Option<String> {
        if self.is_processed() {
            return None;
        }
        self.flush()
    }

    fn flush(&mut self) -> Option<String> {
        self.state = ExtractionState::FlushedNoThought;
        self.buffered_chars = 0;
        non_empty(std::mem::take(&mut self.buffer))
    }
}

#[inline]
fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cot::extract_and_format;

    fn run(mode: CotMode, fragments: &[&str]) -> (String, CotExtractor) {
        let mut extractor = CotExtractor::new(mode);
        let mut out = String::new();
        for fragment in fragments {
            if let Some(text) = extractor.push(fragment) {
                out.push_str(&text);
            }
        }
        if let Some(text) = extractor.finish() {
            out.push_str(&text);
        }
        (out, extractor)
    }

    #[test]
    fn test_non_matching_text_stays_buffered() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        assert_eq!(extractor.push("Just a "), None);
        assert_eq!(extractor.push("reply"), None);
        assert_eq!(extractor.state(), ExtractionState::Buffering);
        assert_eq!(extractor.buffered(), "Just a reply");
    }

    #[test]
    fn test_exact_cap_stays_buffering() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        let text = "x".repeat(BUFFER_CAP_CHARS);
        assert_eq!(extractor.push(&text), None);
        assert_eq!(extractor.state(), ExtractionState::Buffering);
    }

    #[test]
    fn test_cap_plus_one_flushes_entire_buffer() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        assert_eq!(extractor.push(&"x".repeat(BUFFER_CAP_CHARS)), None);
        let out = extractor.push("y").unwrap();
        assert_eq!(out.chars().count(), BUFFER_CAP_CHARS + 1);
        assert!(out.ends_with("xy"));
        assert_eq!(extractor.state(), ExtractionState::FlushedNoThought);
        assert!(extractor.buffered().is_empty());
    }

    #[test]
    fn test_cap_counts_chars_not_bytes() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        let text = "é".repeat(BUFFER_CAP_CHARS);
        assert_eq!(extractor.push(&text), None);
        assert_eq!(extractor.state(), ExtractionState::Buffering);
    }

    #[test]
    fn test_unclosed_preamble_flushes_raw_over_cap() {
        let mut extractor = CotExtractor::new(CotMode::Details);
        let mut text = String::from("[");
        text.push_str(&"t".repeat(BUFFER_CAP_CHARS));
        let out = extractor.push(&text).unwrap();
        assert_eq!(out, text);
        assert_eq!(extractor.thought(), None);
    }

    #[test]
    fn test_scenario_think() {
        let (out, extractor) = run(CotMode::Think, &["[hello world]Hi there"]);
        assert!(out.starts_with("<think>"));
        let open = out.find("hello world").unwrap();
        let close = out.find("</think>").unwrap();
        let body = out.find("Hi there").unwrap();
        assert!(open < close && close < body);
        assert_eq!(extractor.state(), ExtractionState::Extracted);
        assert_eq!(extractor.thought(), Some("hello world"));
    }

    #[test]
    fn test_scenario_details() {
        let (out, _) = run(CotMode::Details, &["[hello world]Hi there"]);
        assert!(out.starts_with("<details>"));
        assert!(out.contains("<summary>Thought process</summary>"));
        assert!(out.contains("hello world"));
        assert!(out.ends_with("</details>\n\nHi there"));
    }

    #[test]
    fn test_scenario_strip_fragments_match_complete() {
        let (out, _) = run(CotMode::Strip, &["[he", "llo]Hi", " there"]);
        let whole = extract_and_format(&CotMode::Strip, Delivery::Complete, "[hello]Hi there");
        assert_eq!(out, whole);
    }

    #[test]
    fn test_no_preamble_passes_through_on_finish() {
        for mode in [CotMode::Reasoning, CotMode::Think, CotMode::Strip, CotMode::Details] {
            let (out, extractor) = run(mode, &["Just a", " reply"]);
            assert_eq!(out, "Just a reply");
            assert_eq!(extractor.state(), ExtractionState::FlushedNoThought);
        }
    }

    #[test]
    fn test_verbatim_after_resolution() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        assert!(extractor.push("[t]").is_some());
        assert_eq!(extractor.push("[again]").as_deref(), Some("[again]"));
        assert_eq!(extractor.push("  ").as_deref(), Some("  "));
        assert_eq!(extractor.finish(), None);
        assert_eq!(extractor.thought(), Some("t"));
    }

    #[test]
    fn test_whitespace_after_resolution_is_forwarded() {
        let (split, _) = run(CotMode::Think, &["[T]", " BODY"]);
        assert_eq!(split, "<think>\n\nT\n\n</think>\n\n BODY");
        let (whole, _) = run(CotMode::Think, &["[T] BODY"]);
        assert_eq!(whole, "<think>\n\nT\n\n</think>\n\nBODY");
    }

    #[test]
    fn test_every_split_is_boundary_invariant() {
        let text = "[THOUGHT]BODY";
        let expected = extract_and_format(&CotMode::Think, Delivery::Streaming, text);
        let chars: Vec<char> = text.chars().collect();
        // Every subset of cut points between characters.
        for mask in 0u32..(1 << (chars.len() - 1)) {
            let mut fragments = Vec::new();
            let mut current = String::new();
            for (i, ch) in chars.iter().enumerate() {
                current.push(*ch);
                if i + 1 < chars.len() && mask & (1 << i) != 0 {
                    fragments.push(std::mem::take(&mut current));
                }
            }
            fragments.push(current);
            let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
            let (out, _) = run(CotMode::Think, &refs);
            assert_eq!(out, expected, "fragments: {fragments:?}");
        }
    }

    #[test]
    fn test_empty_fragments_emit_nothing() {
        let mut extractor = CotExtractor::new(CotMode::Think);
        assert_eq!(extractor.push(""), None);
        assert!(extractor.push("[]").is_none());
        assert_eq!(extractor.state(), ExtractionState::Extracted);
        assert_eq!(extractor.push("").as_deref(), None);
    }
}
