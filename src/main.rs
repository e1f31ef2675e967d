use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use stream_fold::batch::{aggregate_file, convert_directory, render_json};
use stream_fold::config::{load_config, AppConfig};
use stream_fold::error::CanonicalError;
use stream_fold::observability::init_tracing;
use stream_fold::protocol::Dialect;
use stream_fold::routing::detect_dialect;
use stream_fold::transfer::{transfer_capture, unified_transfer, Capture, TransferKind};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DialectArg {
    #[value(name = "openai-chat", alias = "chat")]
    OpenAiChat,
    #[value(name = "openai-responses", alias = "responses")]
    OpenAiResponses,
    #[value(name = "anthropic", alias = "claude")]
    Anthropic,
    #[value(name = "gemini")]
    Gemini,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::OpenAiChat => Dialect::OpenAiChat,
            DialectArg::OpenAiResponses => Dialect::OpenAiResponses,
            DialectArg::Anthropic => Dialect::Anthropic,
            DialectArg::Gemini => Dialect::Gemini,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum KindArg {
    /// Streamed `text/event-stream` dump.
    #[default]
    #[value(alias = "stream")]
    Sse,
    /// Non-streaming request body.
    Request,
    /// Non-streaming response body.
    Response,
}

impl From<KindArg> for TransferKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Sse => TransferKind::Sse,
            KindArg::Request => TransferKind::Request,
            KindArg::Response => TransferKind::Response,
        }
    }
}

/// Reassemble captured LLM API streams into complete response objects.
#[derive(Debug, Parser)]
#[command(name = "stream-fold", version)]
struct Cli {
    /// YAML configuration file (default: ./config.yaml when present).
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Wire dialect of the input. Overrides the configured dialect.
    #[arg(long, value_enum, conflicts_with = "path")]
    dialect: Option<DialectArg>,

    /// Request path the input was captured from (e.g. /v1/messages). Streams
    /// are judged by the path; request and response bodies by the path and
    /// their shape.
    #[arg(long, value_name = "REQUEST_PATH")]
    path: Option<String>,

    /// What the input body is.
    #[arg(long, value_enum, default_value_t = KindArg::Sse, conflicts_with = "all")]
    kind: KindArg,

    /// Wrap output as {"response": ..., "meta": ...}.
    #[arg(long)]
    meta: bool,

    /// Convert every matching dump in the INPUT directory next to its input.
    #[arg(long, conflicts_with = "output")]
    all: bool,

    /// Input file, or directory with --all.
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file (default: stdout).
    #[arg(value_name = "OUTPUT")]
    output: Option<PathBuf>,
}

impl Cli {
    /// A request or response body with a request path and no explicit
    /// dialect is judged by its path and shape.
    fn judges_body(&self) -> bool {
        self.dialect.is_none() && self.path.is_some() && !matches!(self.kind, KindArg::Sse)
    }

    fn dialect(&self) -> Result<Option<Dialect>, CanonicalError> {
        if let Some(arg) = self.dialect {
            return Ok(Some(arg.into()));
        }
        match self.path.as_deref() {
            Some(path) => detect_dialect(path)
                .map(Some)
                .ok_or_else(|| CanonicalError::UnsupportedDialect(path.to_string())),
            None => Ok(None),
        }
    }
}

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(if e.use_stderr() { 64 } else { 0 });
    });

    let config = resolve_config(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(e.exit_code());
    });

    init_tracing(&config.log_level, &config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(run(cli, config)) {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }
}

fn resolve_config(path: Option<&str>) -> Result<AppConfig, CanonicalError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Ok(load_config(DEFAULT_CONFIG_PATH)?),
        None => Ok(AppConfig::default()),
    }
}

async fn run(cli: Cli, mut config: AppConfig) -> Result<(), CanonicalError> {
    if !cli.judges_body() {
        if let Some(dialect) = cli.dialect()? {
            config.batch.dialect = dialect;
        }
    }
    config.batch.include_meta |= cli.meta;

    if cli.all {
        let report = convert_directory(&cli.input, &config.batch).await?;
        for path in &report.written {
            eprintln!("Wrote: {}", path.display());
        }
        return match report.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        };
    }

    let dialect = config.batch.dialect;
    let value = match TransferKind::from(cli.kind) {
        TransferKind::Sse => aggregate_file(&cli.input, dialect)
            .await?
            .into_output(config.batch.include_meta),
        kind => {
            let text = tokio::fs::read_to_string(&cli.input).await?;
            let transferred = match cli.path.as_deref() {
                Some(request_path) if cli.judges_body() => {
                    let capture = Capture {
                        kind,
                        request_path,
                        content_type: None,
                        body: &text,
                    };
                    transfer_capture(&capture)?.1
                }
                _ => unified_transfer(dialect, kind, &text)?,
            };
            transferred.into_value(config.batch.include_meta)
        }
    };
    let rendered = render_json(&value)?;

    match cli.output {
        Some(output) => {
            tokio::fs::write(&output, rendered).await?;
            eprintln!("Wrote: {}", output.display());
        }
        None => std::io::stdout().lock().write_all(&rendered)?,
    }
    Ok(())
}
