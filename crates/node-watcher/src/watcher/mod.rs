//! Turns pod observations into node events.
//!
//! - [`classifier`]: maps container termination to an [`api_types::ExitReason`]
//! - [`translator`]: maps one pod to one node event
//! - [`snapshot`]: point-in-time listing of a job's nodes
//! - [`node_watcher`]: the long-running watch loop with reconnect and reconciliation

pub mod backoff;
pub mod classifier;
pub mod consumer;
pub mod node_watcher;
pub mod snapshot;
pub mod translator;
pub(crate) mod view;

pub use consumer::FnConsumer;
pub use consumer::NodeEventConsumer;
pub use node_watcher::NodeWatcher;
pub use node_watcher::WatchHandle;
pub use snapshot::NodeSnapshot;
