use serde::{Deserialize, Serialize};

/// Which client wire protocol a response is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngressApi {
    /// Block-oriented "messages" protocol.
    #[serde(alias = "messages")]
    Anthropic,
    /// Chunk-oriented "chat completions" protocol.
    #[serde(alias = "chat")]
    OpenAiChat,
}

impl IngressApi {
    #[must_use]
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "messages" => Some(Self::Anthropic),
            "openai" | "openai_chat" | "chat" | "chat_completions" => Some(Self::OpenAiChat),
            _ => None,
        }
    }
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Reason the response stopped, as resolved by the emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalStopReason {
    EndOfTurn,
    ToolCalls,
    MaxTokens,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl CanonicalUsage {
    #[must_use]
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_tokens.is_none() && self.output_tokens.is_none()
    }
}

/// A tool call carried on a prior assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments exactly as the client sent them.
    #[serde(default)]
    pub arguments: String,
}

/// A single message in the neutral conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<CanonicalToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn new(role: CanonicalRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// A tool's function declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalToolFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A tool specification in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalToolSpec {
    pub function: CanonicalToolFunction,
}

/// Sampling parameters passed through to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

/// The prepared, backend-agnostic request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<CanonicalToolSpec>,
    #[serde(default)]
    pub generation: GenerationParams,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}
