use crate::protocol::canonical::{
    CanonicalMessage, CanonicalRequest, CanonicalToolSpec, GenerationParams,
};
use crate::protocol::mapping::canonical_role_to_openai;

use super::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
    OpenAiToolCallFunction, OpenAiToolFunction,
};

/// Build the streaming request body sent to a chat-completions backend.
///
/// Sampling parameters missing from the request fall back to `defaults`.
#[must_use]
pub fn encode_backend_request(
    canonical: &CanonicalRequest,
    defaults: &GenerationParams,
) -> OpenAiChatRequest {
    let messages = canonical.messages.iter().map(encode_message).collect();

    let tools: Option<Vec<OpenAiTool>> = if canonical.tools.is_empty() {
        None
    } else {
        Some(canonical.tools.iter().map(encode_tool).collect())
    };
    let tool_choice = tools.as_ref().map(|_| "auto".to_string());

    let generation = &canonical.generation;
    OpenAiChatRequest {
        model: canonical.model.clone(),
        messages,
        tools,
        tool_choice,
        stream: true,
        stream_options: Some(OpenAiStreamOptions {
            include_usage: true,
        }),
        max_tokens: generation.max_tokens.or(defaults.max_tokens),
        temperature: generation.temperature.or(defaults.temperature),
        top_p: generation.top_p.or(defaults.top_p),
    }
}

fn encode_message(msg: &CanonicalMessage) -> OpenAiMessage {
    let tool_calls = if msg.tool_calls.is_empty() {
        None
    } else {
        Some(
            msg.tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction {
                        name: call.name.clone(),
                        arguments: if call.arguments.is_empty() {
                            "{}".to_string()
                        } else {
                            call.arguments.clone()
                        },
                    },
                })
                .collect(),
        )
    };

    OpenAiMessage {
        role: canonical_role_to_openai(msg.role).to_string(),
        content: Some(msg.content.clone()),
        tool_calls,
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn encode_tool(tool: &CanonicalToolSpec) -> OpenAiTool {
    OpenAiTool {
        type_: "function".to_string(),
        function: OpenAiToolFunction {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: (!tool.function.parameters.is_null())
                .then(|| tool.function.parameters.clone()),
        },
    }
}
