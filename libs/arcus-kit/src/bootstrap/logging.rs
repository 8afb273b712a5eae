use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use super::app_config::{LogFormat, LoggingConfig};

/// Prefix of rotated log files.
const LOG_FILE_PREFIX: &str = "arcus-service.log";

/// Build the filter: `RUST_LOG` when set, otherwise the configured level plus directives.
///
/// # Errors
/// Returns an error if a configured directive does not parse.
pub fn build_filter(cfg: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&cfg.level)
        .map_err(|e| anyhow::anyhow!("invalid log level '{}': {e}", cfg.level))?;
    for directive in &cfg.directives {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid log directive '{directive}': {e}"))?,
        );
    }
    Ok(filter)
}

/// Install the global subscriber.
///
/// Returns the worker guard of the file writer when logging to files; keep it alive for the
/// lifetime of the process so buffered lines are flushed.
///
/// # Errors
/// Returns an error if the filter is invalid or a global subscriber is already set.
pub fn init_logging(cfg: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = build_filter(cfg)?;

    let (writer, guard, ansi) = match &cfg.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                anyhow::anyhow!("failed to create log directory '{}': {e}", dir.display())
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, cfg.ansi),
    };

    let layer = match cfg.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;

    Ok(guard)
}
