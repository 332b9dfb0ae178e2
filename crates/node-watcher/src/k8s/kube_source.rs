//! [`PodSource`] backed by the Kubernetes API server.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::api::WatchEvent;
use kube::api::WatchParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use tracing::debug;

use crate::config::KubeArgs;
use crate::error::WatcherError;
use crate::k8s::pod_source::PodEventStream;
use crate::k8s::pod_source::PodList;
use crate::k8s::pod_source::PodSource;
use crate::k8s::pod_source::PodWatchEvent;

/// The API server rejects watch timeouts above this many seconds.
const MAX_WATCH_TIMEOUT_SECS: u32 = 290;

/// HTTP status the API server uses when a resource version is too old.
const GONE: u16 = 410;

pub struct KubePodSource {
    api: Api<Pod>,
    watch_timeout_secs: u32,
}

impl KubePodSource {
    /// Create a pod source over `namespace`, or over all namespaces when `None`.
    ///
    /// `watch_timeout` bounds how long the server keeps a single watch open before
    /// closing it; the watcher then resumes from the last resource version.
    pub fn new(client: Client, namespace: Option<&str>, watch_timeout: Duration) -> Self {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let watch_timeout_secs = u32::try_from(watch_timeout.as_secs())
            .unwrap_or(MAX_WATCH_TIMEOUT_SECS)
            .clamp(1, MAX_WATCH_TIMEOUT_SECS);

        Self {
            api,
            watch_timeout_secs,
        }
    }
}

impl KubePodSource {
    /// Connect to the cluster named by `args`.
    ///
    /// Uses the kubeconfig file when one is given, otherwise the in-cluster service
    /// account or the local kubeconfig. An empty namespace selects all namespaces.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::ConnectionFailed`] if no usable client configuration is found
    pub async fn connect(
        args: &KubeArgs,
        watch_timeout: Duration,
    ) -> Result<Self, Report<WatcherError>> {
        let config = client_config(args.kubeconfig.as_deref()).await?;
        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).change_context(WatcherError::ConnectionFailed {
            message: format!("cannot build client for {cluster_url}"),
        })?;

        let namespace = namespace_scope(args.namespace.as_deref());
        debug!(%cluster_url, ?namespace, "Connected to Kubernetes API");
        Ok(Self::new(client, namespace, watch_timeout))
    }
}

async fn client_config(kubeconfig: Option<&Path>) -> Result<Config, Report<WatcherError>> {
    let Some(path) = kubeconfig else {
        return Config::infer()
            .await
            .change_context(WatcherError::ConnectionFailed {
                message: "no in-cluster or local kubeconfig found".to_string(),
            });
    };

    let connection_failed = || WatcherError::ConnectionFailed {
        message: format!("unusable kubeconfig {}", path.display()),
    };
    let kubeconfig = Kubeconfig::read_from(path).change_context_lazy(connection_failed)?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(connection_failed)
}

/// `None` and blank namespaces mean every namespace.
fn namespace_scope(namespace: Option<&str>) -> Option<&str> {
    namespace.map(str::trim).filter(|ns| !ns.is_empty())
}

#[async_trait]
impl PodSource for KubePodSource {
    async fn list_pods(&self, label_selector: &str) -> Result<PodList, Report<WatcherError>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api.list(&params).await.map_err(|e| {
            kube_error(
                e,
                WatcherError::ListFailed {
                    message: format!("selector {label_selector}"),
                },
            )
        })?;

        debug!(
            count = list.items.len(),
            resource_version = ?list.metadata.resource_version,
            "Listed pods"
        );

        Ok(PodList {
            resource_version: list.metadata.resource_version,
            pods: list.items,
        })
    }

    async fn watch_pods(
        &self,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, Report<WatcherError>> {
        let params = WatchParams::default()
            .labels(label_selector)
            .timeout(self.watch_timeout_secs);

        let events = match self.api.watch(&params, resource_version).await {
            Ok(events) => events,
            Err(kube::Error::Api(response)) if response.code == GONE => {
                return Ok(stream::iter([Ok(PodWatchEvent::Expired)]).boxed());
            }
            Err(e) => {
                return Err(kube_error(
                    e,
                    WatcherError::WatchFailed {
                        message: format!(
                            "selector {label_selector} from resource version {resource_version}"
                        ),
                    },
                ));
            }
        };

        Ok(events.map(convert_watch_event).boxed())
    }
}

fn convert_watch_event(
    event: Result<WatchEvent<Pod>, kube::Error>,
) -> Result<PodWatchEvent, Report<WatcherError>> {
    match event {
        Ok(WatchEvent::Added(pod)) => Ok(PodWatchEvent::Added(pod)),
        Ok(WatchEvent::Modified(pod)) => Ok(PodWatchEvent::Modified(pod)),
        Ok(WatchEvent::Deleted(pod)) => Ok(PodWatchEvent::Deleted(pod)),
        Ok(WatchEvent::Bookmark(bookmark)) => Ok(PodWatchEvent::Bookmark {
            resource_version: bookmark.metadata.resource_version,
        }),
        Ok(WatchEvent::Error(response)) if response.code == GONE => Ok(PodWatchEvent::Expired),
        Ok(WatchEvent::Error(response)) => Err(Report::new(WatcherError::WatchFailed {
            message: format!(
                "{} ({}): {}",
                response.reason, response.code, response.message
            ),
        })),
        Err(e) => Err(Report::new(WatcherError::WatchFailed {
            message: format!("Watch stream error: {e}"),
        })),
    }
}

/// Map a client error onto an error kind, keeping `fallback` for transport failures.
fn kube_error(error: kube::Error, fallback: WatcherError) -> Report<WatcherError> {
    let context = match &error {
        kube::Error::Api(response) if response.code == 400 => WatcherError::InvalidSelector {
            message: response.message.clone(),
        },
        kube::Error::Api(response) if response.code == 404 => WatcherError::NotFound {
            message: response.message.clone(),
        },
        _ => fallback,
    };
    Report::new(context).attach_printable(format!("Kubernetes API error: {error}"))
}
