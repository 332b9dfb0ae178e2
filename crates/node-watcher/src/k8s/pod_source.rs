//! The list/watch seam between the node watcher and the orchestrator API.

use async_trait::async_trait;
use error_stack::Report;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Pod;

use crate::error::WatcherError;

/// Point-in-time listing of the pods matching a selector.
#[derive(Debug, Clone, Default)]
pub struct PodList {
    pub pods: Vec<Pod>,
    /// Resource version of the listing, used to resume a watch right after it.
    pub resource_version: Option<String>,
}

/// A raw notification from the pod watch stream.
#[derive(Debug, Clone)]
pub enum PodWatchEvent {
    Added(Pod),
    Modified(Pod),
    Deleted(Pod),
    /// Progress marker carrying only a newer resource version.
    Bookmark { resource_version: String },
    /// The resource version the watch started from is too old to resume from.
    Expired,
}

pub type PodEventStream = BoxStream<'static, Result<PodWatchEvent, Report<WatcherError>>>;

/// Provides list and watch primitives over pods.
///
/// Implementations must be safe to share between watchers of different jobs.
#[async_trait]
pub trait PodSource: Send + Sync {
    /// List all pods matching `label_selector`.
    async fn list_pods(&self, label_selector: &str) -> Result<PodList, Report<WatcherError>>;

    /// Open a watch on pods matching `label_selector`, starting after `resource_version`.
    ///
    /// The returned stream may end without an error when the server closes it.
    async fn watch_pods(
        &self,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, Report<WatcherError>>;
}
