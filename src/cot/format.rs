use super::scanner::find_preamble;
use super::CotMode;

const REASONING_START_MARKER: &str = "<|reasoning_start|>";
const REASONING_END_MARKER: &str = "<|reasoning_end|>";
const DETAILS_CAPTION: &str = "Thought process";

/// Whether formatted text is produced for a complete reply or a live stream.
///
/// Streaming cannot use the marker-delimited `reasoning` layout, so that mode
/// falls back to the `think` layout there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Complete,
    Streaming,
}

/// Render an extracted thought in front of the remaining content.
///
/// `thought` is cleaned first (trimmed, stray enclosing brackets removed); an
/// empty thought leaves `content` untouched in every mode.
#[must_use]
pub fn format_thought(mode: &CotMode, delivery: Delivery, thought: &str, content: &str) -> String {
    let thought = clean_thought(thought);
    if thought.is_empty() {
        return content.to_string();
    }

    match (mode, delivery) {
        (CotMode::Reasoning, Delivery::Complete) => format!(
            "{REASONING_START_MARKER}\n{thought}\n{REASONING_END_MARKER}\n{content}"
        ),
        (CotMode::Reasoning, Delivery::Streaming) | (CotMode::Think, _) => {
            format!("<think>\n\n{thought}\n\n</think>\n\n{content}")
        }
        (CotMode::Strip, _) => {
            let mut out = String::with_capacity(thought.len() + content.len() + 8);
            for line in thought.lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
            out.push_str(content);
            out
        }
        (CotMode::Details, _) => format!(
            "<details>\n<summary>{DETAILS_CAPTION}</summary>\n\n{thought}\n\n</details>\n\n{content}"
        ),
        (CotMode::Unrecognized(_), _) => format!("[{thought}]{content}"),
    }
}

/// Apply preamble extraction once over a complete reply.
///
/// Text without a leading bracketed preamble is returned unchanged.
#[must_use]
pub fn extract_and_format(mode: &CotMode, delivery: Delivery, text: &str) -> String {
    match find_preamble(text) {
        Some(found) => format_thought(mode, delivery, &text[found.thought], &text[found.end..]),
        None => text.to_string(),
    }
}

pub(super) fn clean_thought(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
}
