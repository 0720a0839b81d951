use crate::dialect::ToolCallRecord;
use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
use crate::protocol::mapping::canonical_stop_to_openai;

use super::stream::ChunkHeader;
use super::{
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiToolCallFunction,
    OpenAiUsage,
};

/// Materialize a complete chat completion.
///
/// `content` is `null` when the response holds tool calls and no text.
#[must_use]
pub fn encode_chat_response(
    header: &ChunkHeader<'_>,
    text: String,
    calls: &[ToolCallRecord],
    stop_reason: CanonicalStopReason,
    usage: &CanonicalUsage,
) -> OpenAiChatResponse {
    let tool_calls: Vec<OpenAiToolCall> = calls
        .iter()
        .map(|call| OpenAiToolCall {
            id: call.id.clone(),
            type_: "function".to_string(),
            function: OpenAiToolCallFunction {
                name: call.name.clone(),
                arguments: call.arguments_json(),
            },
        })
        .collect();

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    OpenAiChatResponse {
        id: header.id.to_string(),
        object: "chat.completion".to_string(),
        created: header.created,
        model: header.model.to_string(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: canonical_stop_to_openai(stop_reason).to_string(),
        }],
        usage: (!usage.is_empty()).then(|| OpenAiUsage {
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
            total_tokens: usage.total_tokens().unwrap_or(0),
        }),
    }
}
