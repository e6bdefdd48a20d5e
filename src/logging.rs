// Tracing subscriber setup for the CLI and embedding services

use crate::settings::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. When a file directory is configured a
/// daily rolling file is written alongside stderr; the returned guard must be held for
/// the lifetime of the process so buffered lines are flushed.
pub fn init_logging(config: &LoggingConfig, debug: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let (file_layer, guard) = match &config.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}
