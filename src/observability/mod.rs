pub mod summary;

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `log_format` selects `text` (default) or `json` lines. Logs go to stderr
/// so converted output on stdout stays clean.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let Some(filter) = env_filter(log_level) else {
        return;
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn env_filter(log_level: &str) -> Option<EnvFilter> {
    let level = tracing_level(log_level)?;
    Some(EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("INFO")))
}

fn tracing_level(log_level: &str) -> Option<String> {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return None;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };
    Some(tracing_level.to_owned())
}
