//! Chain-of-thought preamble handling.
//!
//! Upstream replies may open with a bracketed span of reasoning, e.g.
//! `"[weighing options]Final answer"`. This module finds that span, either
//! incrementally over a growing stream buffer or once over a complete reply,
//! and rewrites it according to the configured [`CotMode`].

mod extractor;
mod format;
mod scanner;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use extractor::{CotExtractor, ExtractionState, BUFFER_CAP_CHARS};
pub use format::{extract_and_format, format_thought, Delivery};
pub use scanner::{find_preamble, PreambleMatch, PreambleScanner};

/// How an extracted thought is rendered into the forwarded content.
///
/// Exactly four values are recognized; any other configured string is kept
/// as [`CotMode::Unrecognized`] and selects the bracket fallback.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CotMode {
    Reasoning,
    #[default]
    Think,
    Strip,
    Details,
    Unrecognized(String),
}

impl CotMode {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "reasoning" => CotMode::Reasoning,
            "think" => CotMode::Think,
            "strip" => CotMode::Strip,
            "details" => CotMode::Details,
            other => CotMode::Unrecognized(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            CotMode::Reasoning => "reasoning",
            CotMode::Think => "think",
            CotMode::Strip => "strip",
            CotMode::Details => "details",
            CotMode::Unrecognized(other) => other,
        }
    }
}

impl From<String> for CotMode {
    fn from(value: String) -> Self {
        CotMode::parse(value.trim())
    }
}

impl From<CotMode> for String {
    fn from(mode: CotMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for CotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recognized_modes() {
        assert_eq!(CotMode::parse("reasoning"), CotMode::Reasoning);
        assert_eq!(CotMode::parse("think"), CotMode::Think);
        assert_eq!(CotMode::parse("strip"), CotMode::Strip);
        assert_eq!(CotMode::parse("details"), CotMode::Details);
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert_eq!(
            CotMode::parse("Think"),
            CotMode::Unrecognized("Think".to_string())
        );
    }

    #[test]
    fn test_mode_serde() {
        let json = serde_json::to_string(&CotMode::Details).unwrap();
        assert_eq!(json, "\"details\"");
        let mode: CotMode = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(mode, CotMode::Unrecognized("raw".to_string()));
        assert_eq!(mode.to_string(), "raw");
    }

    #[test]
    fn test_default_mode_is_think() {
        assert_eq!(CotMode::default(), CotMode::Think);
    }
}
