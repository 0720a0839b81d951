use crate::dialect::ToolCallRecord;
use crate::protocol::anthropic::{AnthropicContentBlock, AnthropicResponse, AnthropicUsage};
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
use crate::protocol::mapping::canonical_stop_to_anthropic;

/// Materialize a complete Messages API response.
///
/// The text block comes first and is present when it has content or when
/// there are no tool calls; `tool_use` blocks follow in call order.
#[must_use]
pub fn encode_messages_response(
    id: String,
    model: &str,
    text: String,
    calls: Vec<ToolCallRecord>,
    stop_reason: CanonicalStopReason,
    usage: &CanonicalUsage,
) -> AnthropicResponse {
    let mut content = Vec::with_capacity(1 + calls.len());
    if !text.is_empty() || calls.is_empty() {
        content.push(AnthropicContentBlock::Text { text });
    }
    content.extend(calls.into_iter().map(|call| AnthropicContentBlock::ToolUse {
        id: call.id,
        name: call.name,
        input: serde_json::Value::Object(call.arguments),
    }));

    AnthropicResponse {
        id,
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content,
        stop_reason: canonical_stop_to_anthropic(stop_reason).to_string(),
        usage: AnthropicUsage {
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
        },
    }
}
