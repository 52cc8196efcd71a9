use std::ops::Range;

/// Location of a leading bracketed preamble inside a text buffer.
///
/// Equivalent to matching `^\s*\[(.*?)\]\s*` (dot matches newlines, ASCII
/// whitespace) against the whole buffer: `thought` is the byte range of the
/// capture and `end` is the byte offset where the remaining content starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreambleMatch {
    pub thought: Range<usize>,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    LeadingWhitespace,
    InsideBracket { open: usize },
    NoPreamble,
}

/// Incremental matcher for the preamble pattern.
///
/// Each call to [`PreambleScanner::advance`] only examines the bytes appended
/// since the previous call, so scanning a buffer that grows fragment by
/// fragment is linear overall.
#[derive(Debug, Clone)]
pub struct PreambleScanner {
    phase: ScanPhase,
    scanned: usize,
}

impl PreambleScanner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ScanPhase::LeadingWhitespace,
            scanned: 0,
        }
    }

    /// True once the buffer has a non-whitespace character other than `[` in
    /// front, meaning no amount of further input can produce a match.
    #[must_use]
    pub fn is_hopeless(&self) -> bool {
        self.phase == ScanPhase::NoPreamble
    }

    /// Continue scanning `buffer`, which must be the previously scanned
    /// buffer with zero or more bytes appended.
    pub fn advance(&mut self, buffer: &str) -> Option<PreambleMatch> {
        let start = self.scanned.min(buffer.len());
        self.scanned = buffer.len();

        for (rel, ch) in buffer[start..].char_indices() {
            let idx = start + rel;
            match self.phase {
                ScanPhase::LeadingWhitespace => {
                    if ch == '[' {
                        self.phase = ScanPhase::InsideBracket { open: idx };
                    } else if !is_pattern_whitespace(ch) {
                        self.phase = ScanPhase::NoPreamble;
                        return None;
                    }
                }
                ScanPhase::InsideBracket { open } => {
                    if ch == ']' {
                        let content_start = idx + 1;
                        let trailing = buffer[content_start..]
                            .find(|c: char| !is_pattern_whitespace(c))
                            .unwrap_or(buffer.len() - content_start);
                        return Some(PreambleMatch {
                            thought: open + 1..idx,
                            end: content_start + trailing,
                        });
                    }
                }
                ScanPhase::NoPreamble => return None,
            }
        }
        None
    }
}

impl Default for PreambleScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Match the preamble pattern once against a complete text.
#[must_use]
pub fn find_preamble(text: &str) -> Option<PreambleMatch> {
    PreambleScanner::new().advance(text)
}

#[inline]
fn is_pattern_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\n' | '\r' | '\u{0B}' | '\u{0C}')
}
