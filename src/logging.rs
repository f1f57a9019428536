//! Tracing setup: terminal output plus a daily-rotated log file.
//!
//! Log level filtering follows `RUST_LOG` with an `info` fallback, e.g.
//! `RUST_LOG=dredge=debug,reqwest=warn`.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the tracing subscriber.
///
/// Writes a compact layer to stdout and a daily-rotated `dredge.log` under
/// `log_dir`. Returns an error if the log directory cannot be created; panics
/// if a subscriber is already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<(), Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily(log_path, "dredge.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact();

    let stdout_layer = fmt::layer().with_target(false).compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer.with_filter(tracing_subscriber::filter::LevelFilter::INFO))
        .init();

    // The guard flushes the background writer; keep it alive for the whole
    // process lifetime.
    Box::leak(Box::new(file_guard));

    tracing::info!("logging initialized, files under {}", log_path.display());
    Ok(())
}
