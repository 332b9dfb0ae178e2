//! provides logging helpers

use std::path::Path;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Environment variable pointing at a directory for rolling log files.
pub const LOG_PATH_ENV_VAR: &str = "NODE_WATCHER_LOG_PATH";

const DEFAULT_LOG_PREFIX: &str = "node-watcher.log";

/// Build the fmt layer, writing to a daily rolling file under `log_path` when given,
/// otherwise to stderr.
///
/// The returned guard must be held for as long as logs should be flushed.
pub fn get_fmt_layer<S>(
    log_path: Option<impl AsRef<Path>>,
) -> (Box<dyn Layer<S> + Send + Sync + 'static>, Option<WorkerGuard>)
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let Some(log_path) = log_path else {
        let fmt_layer = layer().with_writer(std::io::stderr).with_target(true);
        return (fmt_layer.boxed(), None);
    };

    let log_path = log_path.as_ref();
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(DEFAULT_LOG_PREFIX)
        .max_log_files(3)
        .build(log_path)
    {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let fmt_layer = layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (fmt_layer.boxed(), Some(guard))
        }
        Err(err) => {
            eprintln!(
                "failed to create rolling file appender at {}: {err}; falling back to stderr",
                log_path.display()
            );
            let fmt_layer = layer().with_writer(std::io::stderr).with_target(true);
            (fmt_layer.boxed(), None)
        }
    }
}

/// initiate the global tracing subscriber
pub fn init() -> Option<WorkerGuard> {
    let log_path = std::env::var(LOG_PATH_ENV_VAR).ok();
    let (fmt_layer, guard) = get_fmt_layer(log_path);

    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    registry().with(fmt_layer.with_filter(env_filter)).init();
    guard
}
