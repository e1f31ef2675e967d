use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::aggregate::AggregateMeta;
use crate::protocol::Dialect;

/// Log the outcome of one converted stream.
///
/// Streams with parse errors or unrecognized event types are logged at
/// `warn` so they stand out in batch runs.
pub fn log_conversion(source: &Path, dialect: Dialect, meta: &AggregateMeta, elapsed: Duration) {
    let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    if meta.parse_error_count > 0 || !meta.unknown_event_types.is_empty() {
        warn!(
            source = %source.display(),
            %dialect,
            events = meta.event_count,
            parse_errors = meta.parse_error_count,
            unknown_types = ?meta.unknown_event_types,
            elapsed_ms,
            "stream converted with problems"
        );
    } else {
        info!(
            source = %source.display(),
            %dialect,
            events = meta.event_count,
            elapsed_ms,
            "stream converted"
        );
    }
}

/// Log the totals of a batch run.
pub fn log_batch_complete(directory: &Path, converted: usize, failed: usize, elapsed: Duration) {
    info!(
        directory = %directory.display(),
        converted,
        failed,
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        "batch conversion finished"
    );
}
