use super::canonical::{CanonicalRole, CanonicalStopReason};
use crate::stream::BackendFinishReason;

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_role_to_openai(role: CanonicalRole) -> &'static str {
    match role {
        CanonicalRole::System => "system",
        CanonicalRole::User => "user",
        CanonicalRole::Assistant => "assistant",
        CanonicalRole::Tool => "tool",
    }
}

// ---------------------------------------------------------------------------
// Stop reason mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn canonical_stop_to_openai(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn => "stop",
        CanonicalStopReason::ToolCalls => "tool_calls",
        CanonicalStopReason::MaxTokens => "length",
    }
}

#[must_use]
pub fn canonical_stop_to_anthropic(reason: CanonicalStopReason) -> &'static str {
    match reason {
        CanonicalStopReason::EndOfTurn => "end_turn",
        CanonicalStopReason::ToolCalls => "tool_use",
        CanonicalStopReason::MaxTokens => "max_tokens",
    }
}

/// Backend `finish_reason` string; unknown values are ignored.
#[must_use]
pub fn openai_finish_to_backend(s: &str) -> Option<BackendFinishReason> {
    match s {
        "stop" | "eos" => Some(BackendFinishReason::Stop),
        "length" => Some(BackendFinishReason::Length),
        "tool_calls" | "function_call" => Some(BackendFinishReason::ToolCalls),
        _ => None,
    }
}

/// Stop reason reported to the client.
///
/// Emitted tool calls win over everything, truncation over the default.
#[must_use]
pub fn resolve_stop_reason(
    backend: Option<BackendFinishReason>,
    emitted_tool_calls: bool,
) -> CanonicalStopReason {
    if emitted_tool_calls {
        return CanonicalStopReason::ToolCalls;
    }
    match backend {
        Some(BackendFinishReason::Length) => CanonicalStopReason::MaxTokens,
        _ => CanonicalStopReason::EndOfTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reasons_per_protocol() {
        assert_eq!(canonical_stop_to_openai(CanonicalStopReason::ToolCalls), "tool_calls");
        assert_eq!(canonical_stop_to_anthropic(CanonicalStopReason::ToolCalls), "tool_use");
        assert_eq!(canonical_stop_to_openai(CanonicalStopReason::MaxTokens), "length");
        assert_eq!(canonical_stop_to_anthropic(CanonicalStopReason::EndOfTurn), "end_turn");
    }

    #[test]
    fn backend_finish_reasons() {
        assert_eq!(openai_finish_to_backend("length"), Some(BackendFinishReason::Length));
        assert_eq!(openai_finish_to_backend("tool_calls"), Some(BackendFinishReason::ToolCalls));
        assert_eq!(openai_finish_to_backend("weird"), None);
    }

    #[test]
    fn emitted_calls_override_backend_reason() {
        assert_eq!(
            resolve_stop_reason(Some(BackendFinishReason::Length), true),
            CanonicalStopReason::ToolCalls
        );
        assert_eq!(
            resolve_stop_reason(Some(BackendFinishReason::Length), false),
            CanonicalStopReason::MaxTokens
        );
        // A backend claiming tool_calls without any emitted call is a plain stop.
        assert_eq!(
            resolve_stop_reason(Some(BackendFinishReason::ToolCalls), false),
            CanonicalStopReason::EndOfTurn
        );
        assert_eq!(resolve_stop_reason(None, false), CanonicalStopReason::EndOfTurn);
    }
}
