//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            "sql2textfs=debug,engine=debug,info".into()
        } else {
            "info".into()
        }
    })
}

/// Install the global subscriber
///
/// With a log file, output goes through a non-blocking writer; keep the
/// returned guard alive for as long as logs should be flushed. The file is
/// opened here so a bad path fails startup.
pub fn init(log_file: Option<&Path>, verbose: bool) -> std::io::Result<Option<WorkerGuard>> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter(verbose))
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter(verbose))
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}
