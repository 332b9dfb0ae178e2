pub mod cli;
pub mod watch;

use std::time::Duration;

/// Tuning of the node watcher's calls to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Bound on a single list or watch-establish call.
    pub request_timeout: Duration,
    /// How long the API server keeps one watch open before closing it.
    pub watch_timeout: Duration,
    /// First delay before retrying a failed call.
    pub initial_backoff: Duration,
    /// Upper bound of the retry delay.
    pub max_backoff: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            watch_timeout: Duration::from_secs(290),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl From<&watch::WatchArgs> for WatcherConfig {
    fn from(args: &watch::WatchArgs) -> Self {
        let initial_backoff_ms = args.initial_backoff_ms.max(1);
        Self {
            request_timeout: Duration::from_secs(args.kube.request_timeout_secs.max(1)),
            watch_timeout: Duration::from_secs(args.watch_timeout_secs.max(1)),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(args.max_backoff_ms.max(initial_backoff_ms)),
        }
    }
}

impl From<&watch::KubeArgs> for WatcherConfig {
    fn from(args: &watch::KubeArgs) -> Self {
        Self {
            request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            ..Self::default()
        }
    }
}


pub use cli::*;
pub use watch::*;
