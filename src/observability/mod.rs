use std::time::{Duration, Instant};

use crate::protocol::canonical::CanonicalUsage;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// Output goes to stderr so stdout stays free for SSE frames.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn tracing_directive(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Log token usage for a completed response, computing duration from start time.
pub fn log_response_complete(model: &str, usage: &CanonicalUsage, start_time: Instant) {
    log_response_usage(model, usage, start_time.elapsed());
}

fn log_response_usage(model: &str, usage: &CanonicalUsage, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_tokens.unwrap_or(0),
        output_tokens = usage.output_tokens.unwrap_or(0),
        total_tokens = usage.total_tokens().unwrap_or(0),
        duration_seconds = duration.as_secs_f64(),
        "response completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_map_to_directives() {
        assert_eq!(tracing_directive("DISABLED"), None);
        assert_eq!(tracing_directive("warning").as_deref(), Some("WARN"));
        assert_eq!(tracing_directive("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(tracing_directive("debug").as_deref(), Some("DEBUG"));
    }
}
