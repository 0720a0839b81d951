use crate::error::ErrorCategory;

/// `(type, code)` pair of a chat-completions error body.
fn openai_error_kind(cat: ErrorCategory) -> (&'static str, &'static str) {
    match cat {
        ErrorCategory::InvalidRequest => ("invalid_request_error", "invalid_request"),
        ErrorCategory::Authentication => ("authentication_error", "invalid_api_key"),
        ErrorCategory::Permission => ("permission_error", "permission_denied"),
        ErrorCategory::RateLimit => ("rate_limit_error", "rate_limit_exceeded"),
        ErrorCategory::ServerError | ErrorCategory::Unknown => ("server_error", "backend_error"),
    }
}

fn anthropic_error_type(cat: ErrorCategory) -> &'static str {
    match cat {
        ErrorCategory::InvalidRequest => "invalid_request_error",
        ErrorCategory::Authentication => "authentication_error",
        ErrorCategory::Permission => "permission_error",
        ErrorCategory::RateLimit => "rate_limit_error",
        ErrorCategory::ServerError | ErrorCategory::Unknown => "api_error",
    }
}

#[must_use]
pub(crate) fn openai_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    let (kind, code) = openai_error_kind(cat);
    serde_json::json!({
        "error": {
            "message": message,
            "type": kind,
            "code": code,
            "param": null,
        }
    })
}

#[must_use]
pub(crate) fn anthropic_error_payload(cat: ErrorCategory, message: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "error",
        "error": {
            "type": anthropic_error_type(cat),
            "message": message,
        }
    })
}
