//! Context budget estimation.
//!
//! A cheap, model-agnostic estimate (about four characters per token) of how
//! much of the backend's context window a request already uses, with room
//! reserved for the response.
use crate::config::ContextBudgetConfig;
use crate::protocol::canonical::{CanonicalMessage, CanonicalRequest, CanonicalToolSpec};
use crate::protocol::openai_chat::{OpenAiTool, OpenAiToolFunction};

const MESSAGE_OVERHEAD: u64 = 2;
const TOOL_CALL_OVERHEAD: u64 = 10;

/// Result of a budget check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub estimated_tokens: u64,
    /// Context left for input once the response reservation is taken out.
    pub available_tokens: u64,
    pub usage_percent: u64,
    pub should_warn: bool,
}

impl ContextBudget {
    /// Advisory shown to the user ahead of the model output.
    #[must_use]
    pub fn warning_message(&self) -> Option<String> {
        self.should_warn.then(|| {
            format!(
                "\u{26a0}\u{fe0f} Context is {}% full ({}/{} tokens). Please run /compact (Claude) or /compress (Qwen) to avoid errors.",
                self.usage_percent, self.estimated_tokens, self.available_tokens
            )
        })
    }

    /// Compact form for a response header.
    #[must_use]
    pub fn status(&self) -> Option<String> {
        self.should_warn.then(|| {
            format!(
                "usage={}%;tokens={};limit={}",
                self.usage_percent, self.estimated_tokens, self.available_tokens
            )
        })
    }
}

#[must_use]
pub fn estimate_text_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / 4
}

#[must_use]
pub fn estimate_messages_tokens(messages: &[CanonicalMessage]) -> u64 {
    messages
        .iter()
        .map(|message| {
            let calls: u64 = message
                .tool_calls
                .iter()
                .map(|call| {
                    TOOL_CALL_OVERHEAD
                        + estimate_text_tokens(&call.name)
                        + estimate_text_tokens(&call.arguments)
                })
                .sum();
            MESSAGE_OVERHEAD + estimate_text_tokens(&message.content) + calls
        })
        .sum()
}

/// Tool schemas are costed on their wire JSON.
#[must_use]
pub fn estimate_tools_tokens(tools: &[CanonicalToolSpec]) -> u64 {
    if tools.is_empty() {
        return 0;
    }
    let wire: Vec<OpenAiTool> = tools
        .iter()
        .map(|tool| OpenAiTool {
            type_: "function".to_string(),
            function: OpenAiToolFunction {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                parameters: Some(tool.function.parameters.clone()),
            },
        })
        .collect();
    serde_json::to_string(&wire).map_or(0, |json| estimate_text_tokens(&json))
}

/// Estimate how full the context is for `request`.
///
/// `default_max_tokens` applies when the request does not set its own.
#[must_use]
pub fn check_context_budget(
    request: &CanonicalRequest,
    config: &ContextBudgetConfig,
    default_max_tokens: u64,
) -> ContextBudget {
    let estimated_tokens =
        estimate_messages_tokens(&request.messages) + estimate_tools_tokens(&request.tools);

    let limit = config.context_limit;
    let max_tokens = request.generation.max_tokens.unwrap_or(default_max_tokens);
    let available_tokens = limit.saturating_sub(max_tokens.min(limit / 2));
    let usage_percent = if available_tokens > 0 {
        estimated_tokens.saturating_mul(100) / available_tokens
    } else {
        0
    };
    let should_warn = usage_percent >= config.warning_threshold;

    if should_warn {
        tracing::warn!(
            usage_percent,
            estimated_tokens,
            available_tokens,
            context_limit = limit,
            "context nearly exhausted"
        );
    }

    ContextBudget {
        estimated_tokens,
        available_tokens,
        usage_percent,
        should_warn,
    }
}
