use std::time::Instant;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = tracing_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
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

/// Log a finished chat completion with whatever usage upstream reported.
pub fn log_request_complete(
    model: &str,
    stream: bool,
    usage: Option<&serde_json::Value>,
    start_time: Instant,
) {
    let field = |name: &str| {
        usage
            .and_then(|u| u.get(name))
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0)
    };
    tracing::info!(
        model,
        stream,
        prompt_tokens = field("prompt_tokens"),
        completion_tokens = field("completion_tokens"),
        total_tokens = field("total_tokens"),
        elapsed_ms = u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
        "chat completion finished"
    );
}
