//! ClipScribe Core Library
//!
//! Annotates videos with a remote vision-language model (Qwen-VL on
//! DashScope). The library holds two pieces:
//!
//! - `core::cost`: token-cost model, parameter search and validation
//! - `core::annotations`: the cancellable, retryable annotation pipeline
//!
//! plus settings, result storage and logging setup shared by front ends.

pub mod core;

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;

/// Log file name inside the log directory
pub const LOG_FILE_NAME: &str = "clipscribe.log";

/// Installs the global tracing subscriber.
///
/// Logs go to stdout (or stderr when `use_stderr` is set, keeping stdout
/// free for machine-readable output) and, when `log_dir` is given, to a
/// daily rolling file. Keep the returned guard alive for the lifetime of
/// the program or buffered file output is lost.
pub fn init_logging(log_dir: Option<&Path>, use_stderr: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let console_layer = if use_stderr {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(cfg!(debug_assertions))
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(cfg!(debug_assertions))
            .boxed()
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, repeated calls).
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}
