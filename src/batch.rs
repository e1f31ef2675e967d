//! Convert captured stream dumps on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use regex_lite::Regex;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

use crate::aggregate::{aggregate_stream, AggregateMeta, Aggregated};
use crate::config::BatchConfig;
use crate::error::CanonicalError;
use crate::observability::summary::{log_batch_complete, log_conversion};
use crate::protocol::Dialect;

/// Outcome of a directory run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Written output paths, in input name order.
    pub written: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, CanonicalError)>,
}

/// Aggregate one dump file.
///
/// The file is streamed in chunks through the frame splitter, so the dump is
/// never held in memory as a whole. Invalid UTF-8 is decoded as U+FFFD and
/// only spoils the frame it appears in.
///
/// # Errors
///
/// Returns [`CanonicalError::Io`] when the file cannot be opened or read.
pub async fn aggregate_file(input: &Path, dialect: Dialect) -> Result<Aggregated, CanonicalError> {
    let file = File::open(input).await?;
    Ok(aggregate_stream(dialect, ReaderStream::new(file)).await?)
}

/// Pretty-printed JSON with a trailing newline.
///
/// # Errors
///
/// Returns [`CanonicalError::Json`] when the value cannot be serialized.
pub fn render_json(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    let mut rendered = serde_json::to_vec_pretty(value)?;
    rendered.push(b'\n');
    Ok(rendered)
}

/// Aggregate one dump file and write the result next to it as pretty JSON.
///
/// # Errors
///
/// Returns [`CanonicalError::Io`] when reading or writing fails and
/// [`CanonicalError::Json`] when the output cannot be serialized.
pub async fn convert_file(
    input: &Path,
    output: &Path,
    dialect: Dialect,
    include_meta: bool,
) -> Result<AggregateMeta, CanonicalError> {
    let started = Instant::now();
    let aggregated = aggregate_file(input, dialect).await?;
    let meta = aggregated.meta.clone();

    let rendered = render_json(&aggregated.into_output(include_meta))?;
    let mut file = File::create(output).await?;
    file.write_all(&rendered).await?;
    file.flush().await?;

    log_conversion(input, dialect, &meta, started.elapsed());
    Ok(meta)
}

/// Output path for `input`: the file stem plus `suffix`, next to the input.
#[must_use]
pub fn output_path_for(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{stem}{suffix}"))
}

/// Files in `directory` whose names match `pattern`, sorted by name.
///
/// # Errors
///
/// Returns [`CanonicalError::Io`] when the directory cannot be listed.
pub async fn matching_files(directory: &Path, pattern: &Regex) -> Result<Vec<PathBuf>, CanonicalError> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if pattern.is_match(&name.to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort_unstable_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Convert every matching file in `directory`, up to `config.concurrency`
/// at a time. A failing file is logged and reported; the rest still run.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidInput`] for an invalid input pattern and
/// [`CanonicalError::Io`] when the directory cannot be listed.
pub async fn convert_directory(
    directory: &Path,
    config: &BatchConfig,
) -> Result<BatchReport, CanonicalError> {
    let started = Instant::now();
    let pattern = Regex::new(&config.input_pattern)
        .map_err(|e| CanonicalError::InvalidInput(format!("input pattern: {e}")))?;
    let inputs = matching_files(directory, &pattern).await?;
    debug!(directory = %directory.display(), files = inputs.len(), "batch inputs collected");

    let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut tasks = JoinSet::new();
    for (position, input) in inputs.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let output = output_path_for(&input, &config.output_suffix);
        let dialect = config.dialect;
        let include_meta = config.include_meta;
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await;
            let result = convert_file(&input, &output, dialect, include_meta).await;
            (position, input, output, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "conversion task panicked"),
        }
    }
    outcomes.sort_unstable_by_key(|(position, ..)| *position);

    let mut report = BatchReport::default();
    for (_, input, output, result) in outcomes {
        match result {
            Ok(_) => report.written.push(output),
            Err(e) => {
                error!(source = %input.display(), error = %e, "conversion failed");
                report.failed.push((input, e));
            }
        }
    }
    log_batch_complete(
        directory,
        report.written.len(),
        report.failed.len(),
        started.elapsed(),
    );
    Ok(report)
}
