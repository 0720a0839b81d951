use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;

use super::ChatBackend;
use crate::config::BackendConfig;
use crate::error::DialectifyError;
use crate::protocol::canonical::{CanonicalRequest, GenerationParams};
use crate::protocol::openai_chat::request::encode_backend_request;
use crate::stream::{decode_delta_stream, sse_event_stream, DeltaStream};

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Streaming chat-completions client for a llama-server compatible endpoint.
#[derive(Debug, Clone)]
pub struct LlamaServerBackend {
    client: reqwest::Client,
    base_url: String,
    completions_url: String,
    defaults: GenerationParams,
}

impl LlamaServerBackend {
    /// Build a client for `config.base_url`.
    ///
    /// There is no overall request timeout: a response may stream for as
    /// long as the model generates.
    ///
    /// # Errors
    ///
    /// Returns [`DialectifyError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &BackendConfig, defaults: GenerationParams) -> Result<Self, DialectifyError> {
        let client = reqwest::Client::builder()
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|err| {
                DialectifyError::Transport(format!("Failed to build HTTP client: {err}"))
            })?;
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let completions_url = format!("{base_url}/v1/chat/completions");
        Ok(Self {
            client,
            base_url,
            completions_url,
            defaults,
        })
    }

    #[must_use]
    pub fn completions_url(&self) -> &str {
        &self.completions_url
    }

    /// `true` when `GET {base_url}/health` answers 200.
    pub async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(err) => {
                tracing::debug!(error = %err, "backend health check failed");
                false
            }
        }
    }

    async fn open_stream(&self, request: &CanonicalRequest) -> Result<DeltaStream, DialectifyError> {
        let body = encode_backend_request(request, &self.defaults);
        tracing::debug!(
            url = %self.completions_url,
            model = %request.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "opening backend stream"
        );

        let response = self
            .client
            .post(&self.completions_url)
            .header(http::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_bytes = response.bytes().await.map_err(|e| {
                DialectifyError::Transport(format!("Failed to read error body: {e}"))
            })?;
            return Err(DialectifyError::Backend {
                status: status.as_u16(),
                message: backend_error_message(&body_bytes),
            });
        }

        let bytes = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| DialectifyError::Transport(e.to_string()))),
        );
        Ok(decode_delta_stream(Box::pin(sse_event_stream(bytes))))
    }
}

impl ChatBackend for LlamaServerBackend {
    fn open(
        &self,
        request: &CanonicalRequest,
    ) -> impl Future<Output = Result<DeltaStream, DialectifyError>> + Send {
        self.open_stream(request)
    }
}

/// Human-readable message from a backend error body.
///
/// Prefers `error.message` (or a plain string `error`) from a JSON body,
/// otherwise the raw text; either way truncated.
fn backend_error_message(body: &[u8]) -> String {
    let raw = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(json) => match json.get("error") {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(error) => error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map_or_else(|| json.to_string(), str::to_string),
            None => json.to_string(),
        },
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    truncate_message(raw)
}

fn truncate_message(mut message: String) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_LEN {
        return message;
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message.truncate(end);
    message.push_str("...");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_url_tolerates_trailing_slash() {
        let config = BackendConfig {
            base_url: "http://127.0.0.1:8080/".to_string(),
            ..BackendConfig::default()
        };
        let backend = LlamaServerBackend::new(&config, GenerationParams::default()).expect("client");
        assert_eq!(backend.completions_url(), "http://127.0.0.1:8080/v1/chat/completions");
    }

    #[test]
    fn error_message_prefers_json_message() {
        assert_eq!(
            backend_error_message(br#"{"error":{"code":503,"message":"Loading model"}}"#),
            "Loading model"
        );
        assert_eq!(backend_error_message(br#"{"error":"busy"}"#), "busy");
        assert_eq!(backend_error_message(b"  plain failure \n"), "plain failure");
    }

    #[test]
    fn long_messages_are_truncated_on_char_boundary() {
        let message = backend_error_message("\u{e9}".repeat(400).as_bytes());
        assert!(message.ends_with("..."));
        assert!(message.len() <= MAX_ERROR_MESSAGE_LEN + 3);
    }
}
