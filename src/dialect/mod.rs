//! In-band tool-call dialects.
//!
//! A dialect is the textual convention a backend model family uses to encode
//! tool invocations inside generated text. Each dialect has a fixed set of
//! start markers (scanned by the streaming transducer) and a pure parser that
//! turns accumulated text into [`ToolCallRecord`]s.
//!
//! Key invariants:
//! - Exactly one dialect is active per response; it is chosen from the model
//!   name before streaming starts and never changes mid-response.
//! - Parsers are pure functions of their input text (modulo freshly generated
//!   call ids).
//! - A call whose arguments cannot be recovered is dropped, never emitted with
//!   empty or garbage arguments.

pub mod bracket;
pub mod channel;
pub mod repair;
pub mod tag;

use serde::{Deserialize, Serialize};

use crate::config::{DialectConfig, DialectSelection};
use crate::util::next_call_id;

pub type ArgumentMap = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A structured tool call extracted from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Unique per response.
    pub id: String,
    pub name: String,
    /// Ordered argument mapping.
    pub arguments: ArgumentMap,
}

impl ToolCallRecord {
    /// Build a record with a freshly generated id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: ArgumentMap) -> Self {
        Self {
            id: next_call_id(),
            name: name.into(),
            arguments,
        }
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: ArgumentMap) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Arguments serialized as a compact JSON object.
    #[must_use]
    pub fn arguments_json(&self) -> String {
        serde_json::to_string(&self.arguments).unwrap_or_else(|_| "{}".to_string())
    }

    /// Identity used for de-duplication of repeated calls.
    pub(crate) fn dedup_key(&self) -> (String, String) {
        (self.name.clone(), self.arguments_json())
    }
}

/// Result of running a dialect parser over accumulated text.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    NoCall,
    Calls(Vec<ToolCallRecord>),
}

impl ParseOutcome {
    #[must_use]
    pub fn from_calls(calls: Vec<ToolCallRecord>) -> Self {
        if calls.is_empty() {
            Self::NoCall
        } else {
            Self::Calls(calls)
        }
    }

    #[must_use]
    pub fn into_calls(self) -> Vec<ToolCallRecord> {
        match self {
            Self::NoCall => Vec::new(),
            Self::Calls(calls) => calls,
        }
    }
}

/// Supported in-band dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectId {
    /// XML-like `<tool_call>` tags (Qwen family).
    Tag,
    /// `[TOOL_CALLS]name[ARGS]{...}` markers (Mistral/Devstral family).
    Bracket,
    /// Multi-channel harmony text (GPT-OSS family).
    Channel,
}

impl DialectId {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            DialectId::Tag => "tag",
            DialectId::Bracket => "bracket",
            DialectId::Channel => "channel",
        }
    }

    /// Run this dialect's parser.
    #[must_use]
    pub fn parse(self, text: &str) -> ParseOutcome {
        match self {
            DialectId::Tag => tag::parse_tool_calls(text),
            DialectId::Bracket => bracket::parse_tool_calls(text),
            DialectId::Channel => channel::parse_tool_calls(text),
        }
    }

    /// User-visible text left in `text` once its tool calls are taken out.
    #[must_use]
    pub fn display_residue(self, text: &str) -> String {
        match self {
            DialectId::Tag => tag::strip_tool_markup(text),
            DialectId::Bracket => bracket::text_before_calls(text).trim_end().to_string(),
            DialectId::Channel => channel::extract_final_channel(text),
        }
    }

    /// Text released when the parser finds no call in buffered text.
    ///
    /// Tag and bracket text is released verbatim. Channel text always goes
    /// through final-channel extraction so internal segments stay hidden.
    #[must_use]
    pub fn false_positive_text(self, text: &str) -> String {
        match self {
            DialectId::Tag | DialectId::Bracket => text.to_string(),
            DialectId::Channel => channel::extract_final_channel(text),
        }
    }
}

impl std::fmt::Display for DialectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Start markers of one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectMarker {
    pub dialect: DialectId,
    pub literals: &'static [&'static str],
    /// Length in bytes of the longest literal.
    pub max_marker_len: usize,
}

const TAG_MARKERS: &[&str] = &["<tool_call>", "<function="];
const BRACKET_MARKERS: &[&str] = &["[TOOL_CALLS]"];
const CHANNEL_MARKERS: &[&str] = &["<|channel|>", "<|start|>", "<|message|>"];

const fn longest(literals: &[&str]) -> usize {
    let mut max = 0;
    let mut i = 0;
    while i < literals.len() {
        if literals[i].len() > max {
            max = literals[i].len();
        }
        i += 1;
    }
    max
}

static MARKERS: [DialectMarker; 3] = [
    DialectMarker {
        dialect: DialectId::Tag,
        literals: TAG_MARKERS,
        max_marker_len: longest(TAG_MARKERS),
    },
    DialectMarker {
        dialect: DialectId::Bracket,
        literals: BRACKET_MARKERS,
        max_marker_len: longest(BRACKET_MARKERS),
    },
    DialectMarker {
        dialect: DialectId::Channel,
        literals: CHANNEL_MARKERS,
        max_marker_len: longest(CHANNEL_MARKERS),
    },
];

/// Built-in model family substrings, checked in order.
const FAMILY_RULES: &[(&str, DialectId)] = &[
    ("gpt-oss", DialectId::Channel),
    ("gpt_oss", DialectId::Channel),
    ("devstral", DialectId::Bracket),
    ("ministral", DialectId::Bracket),
    ("mistral", DialectId::Bracket),
    ("qwen", DialectId::Tag),
];

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Configured substring rule, checked before the built-in families.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DialectRule {
    needle: String,
    dialect: Option<DialectId>,
}

/// Immutable dialect registry, built once at start-up and shared by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectRegistry {
    rules: Vec<DialectRule>,
    default: Option<DialectId>,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DialectRegistry {
    /// Built-in families only; unknown models fall back to the tag dialect.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            rules: Vec::new(),
            default: Some(DialectId::Tag),
        }
    }

    #[must_use]
    pub fn from_config(config: &DialectConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| DialectRule {
                needle: rule.contains.to_ascii_lowercase(),
                dialect: rule.dialect.dialect_id(),
            })
            .collect();
        Self {
            rules,
            default: config.default.dialect_id(),
        }
    }

    /// Marker description for `dialect`.
    #[must_use]
    pub fn marker(&self, dialect: DialectId) -> &'static DialectMarker {
        match dialect {
            DialectId::Tag => &MARKERS[0],
            DialectId::Bracket => &MARKERS[1],
            DialectId::Channel => &MARKERS[2],
        }
    }

    /// Pick the dialect for a model identifier.
    ///
    /// `None` means text-dialect detection is off for this model.
    #[must_use]
    pub fn select(&self, model: &str) -> Option<DialectId> {
        let model = model.to_ascii_lowercase();
        if let Some(rule) = self.rules.iter().find(|rule| model.contains(&rule.needle)) {
            return rule.dialect;
        }
        FAMILY_RULES
            .iter()
            .find(|(needle, _)| model.contains(needle))
            .map_or(self.default, |(_, dialect)| Some(*dialect))
    }
}

impl DialectSelection {
    #[must_use]
    pub fn dialect_id(self) -> Option<DialectId> {
        match self {
            DialectSelection::Tag => Some(DialectId::Tag),
            DialectSelection::Bracket => Some(DialectId::Bracket),
            DialectSelection::Channel => Some(DialectId::Channel),
            DialectSelection::None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Keep the first occurrence of each `(name, arguments)` pair.
pub(crate) fn dedup_calls(calls: Vec<ToolCallRecord>) -> Vec<ToolCallRecord> {
    let mut seen = rustc_hash::FxHashSet::default();
    let before = calls.len();
    let unique: Vec<ToolCallRecord> = calls
        .into_iter()
        .filter(|call| seen.insert(call.dedup_key()))
        .collect();
    if unique.len() < before {
        tracing::debug!(
            removed = before - unique.len(),
            "dropped duplicate tool calls"
        );
    }
    unique
}

/// Length of the leading run of `[A-Za-z0-9_-]` bytes.
#[inline]
pub(crate) fn function_name_len(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialectRuleConfig;

    #[test]
    fn builtin_families_select_dialects() {
        let registry = DialectRegistry::builtin();
        assert_eq!(registry.select("gpt-oss-20b"), Some(DialectId::Channel));
        assert_eq!(registry.select("openai/GPT_OSS-120B"), Some(DialectId::Channel));
        assert_eq!(registry.select("Devstral-Small-2505"), Some(DialectId::Bracket));
        assert_eq!(registry.select("ministral-8b"), Some(DialectId::Bracket));
        assert_eq!(registry.select("Qwen3-Coder-30B-A3B"), Some(DialectId::Tag));
        assert_eq!(registry.select("llama-3.1-8b"), Some(DialectId::Tag));
    }

    #[test]
    fn configured_rules_win_over_families() {
        let config = DialectConfig {
            default: DialectSelection::None,
            rules: vec![
                DialectRuleConfig {
                    contains: "Mistral-Harmony".to_string(),
                    dialect: DialectSelection::Channel,
                },
                DialectRuleConfig {
                    contains: "plain".to_string(),
                    dialect: DialectSelection::None,
                },
            ],
        };
        let registry = DialectRegistry::from_config(&config);
        assert_eq!(registry.select("mistral-harmony-7b"), Some(DialectId::Channel));
        assert_eq!(registry.select("qwen-plain"), None);
        assert_eq!(registry.select("mistral-7b"), Some(DialectId::Bracket));
        assert_eq!(registry.select("phi-4"), None);
    }

    #[test]
    fn marker_lengths_cover_longest_literal() {
        let registry = DialectRegistry::builtin();
        assert_eq!(registry.marker(DialectId::Tag).max_marker_len, "<tool_call>".len());
        assert_eq!(registry.marker(DialectId::Bracket).max_marker_len, "[TOOL_CALLS]".len());
        assert_eq!(registry.marker(DialectId::Channel).max_marker_len, "<|message|>".len());
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let mut args = ArgumentMap::new();
        args.insert("path".to_string(), serde_json::json!("a.txt"));
        let calls = vec![
            ToolCallRecord::new("read", args.clone()),
            ToolCallRecord::new("list", ArgumentMap::new()),
            ToolCallRecord::new("read", args),
        ];
        let first_id = calls[0].id.clone();
        let unique = dedup_calls(calls);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].id, first_id);
        assert_eq!(unique[1].name, "list");
    }

    #[test]
    fn parse_outcome_from_empty_is_no_call() {
        assert_eq!(ParseOutcome::from_calls(Vec::new()), ParseOutcome::NoCall);
        assert!(ParseOutcome::NoCall.into_calls().is_empty());
    }
}
