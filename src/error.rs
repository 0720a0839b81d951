use crate::protocol::canonical::IngressApi;
use crate::protocol::error_shapes::{anthropic_error_payload, openai_error_payload};

/// Error type used across all modules.
///
/// Nothing in here is raised once a response has started streaming: from that
/// point failures are rendered as inline text notices.
#[derive(Debug, thiserror::Error)]
pub enum DialectifyError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Backend error: status={status}, message={message}")]
    Backend { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Unknown,
}

/// Map a backend HTTP status code to an error category.
#[must_use]
pub fn category_from_backend_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl DialectifyError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            DialectifyError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            DialectifyError::Config(_)
            | DialectifyError::Transport(_)
            | DialectifyError::Decode(_)
            | DialectifyError::Internal(_) => ErrorCategory::ServerError,
            DialectifyError::Backend { status, .. } => category_from_backend_status(*status),
        }
    }
}

impl From<reqwest::Error> for DialectifyError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => DialectifyError::Backend {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => DialectifyError::Decode(err.to_string()),
            None => DialectifyError::Transport(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Authentication => http::StatusCode::UNAUTHORIZED,
        ErrorCategory::Permission => http::StatusCode::FORBIDDEN,
        ErrorCategory::RateLimit => http::StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::ServerError | ErrorCategory::Unknown => {
            http::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ---------------------------------------------------------------------------
// Format an error for a given client protocol
// ---------------------------------------------------------------------------

/// Format an error for a given client protocol, returning (`status_code`, JSON body).
#[must_use]
pub fn format_error(
    err: &DialectifyError,
    ingress: IngressApi,
) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    let message = err.to_string();

    let body = match ingress {
        IngressApi::OpenAiChat => openai_error_payload(cat, &message),
        IngressApi::Anthropic => anthropic_error_payload(cat, &message),
    };

    (status, body)
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

/// Convert a `DialectifyError` into an axum response for a specific protocol.
#[must_use]
pub fn into_axum_response(err: &DialectifyError, ingress: IngressApi) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err, ingress);
    (status, axum::Json(body)).into_response()
}

/// Falls back to the chat-completions error shape.
impl axum::response::IntoResponse for DialectifyError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self, IngressApi::OpenAiChat)
    }
}
