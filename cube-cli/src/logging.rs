// Copyright 2026 the Cube authors. MIT license.
//
// Logging init (§C "Ambient stack"). Replaces the original's bare
// `log.SetOutput(file)` with a daily-rotating file appender plus an
// env-filtered stdout layer, the way the teacher's `cli` crate wires up
// `tracing-subscriber`/`tracing-appender` for its own diagnostics.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Returns the appender's worker guard; the caller must keep it alive for
/// the process lifetime (dropping it stops the background flush thread).
pub fn init(log_dir: &str) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, "cube.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking))
        .init();

    guard
}
