use std::sync::Arc;
use std::time::Duration;

use api_types::Node;
use api_types::NodeEvent;
use api_types::NodeEventType;
use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::k8s::labels::JobSelector;
use crate::k8s::pod_source::PodSource;
use crate::k8s::pod_source::PodWatchEvent;
use crate::watcher::backoff::Backoff;
use crate::watcher::consumer::NodeEventConsumer;
use crate::watcher::snapshot;
use crate::watcher::translator::translate_pod;
use crate::watcher::view::KnownNodes;

/// Phases of the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchState {
    /// Nothing observed yet; the initial listing seeds the view.
    Init,
    /// Consuming the watch stream that continues after `resource_version`.
    Watching { resource_version: String },
    /// The stream ended or failed. Resumes from `resource_version` when known,
    /// otherwise relists and reconciles against the view.
    Reconnecting { resource_version: Option<String> },
    /// Cancelled. Terminal.
    Stopped,
}

/// Observes the pods of one job and reports their lifecycle as node events.
pub struct NodeWatcher<S: ?Sized> {
    source: Arc<S>,
    selector: JobSelector,
    config: WatcherConfig,
}

impl<S: ?Sized> Clone for NodeWatcher<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            selector: self.selector.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> NodeWatcher<S>
where
    S: PodSource + ?Sized + 'static,
{
    /// Create a watcher for the pods of `job_name`.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::InvalidSelector`] if `job_name` is not a valid label value
    pub fn new(
        source: Arc<S>,
        job_name: impl Into<String>,
        config: WatcherConfig,
    ) -> Result<Self, Report<WatcherError>> {
        Ok(Self {
            source,
            selector: JobSelector::new(job_name)?,
            config,
        })
    }

    pub fn job_name(&self) -> &str {
        self.selector.job_name()
    }

    /// Current nodes of the job, ordered by node type, then id.
    ///
    /// # Errors
    ///
    /// - any listing error; see [`WatcherError::is_retryable`]
    pub async fn list(&self) -> Result<Vec<Node>, Report<WatcherError>> {
        let snapshot = snapshot::list_nodes(
            self.source.as_ref(),
            &self.selector,
            self.config.request_timeout,
        )
        .await?;
        Ok(snapshot.nodes)
    }

    /// Start watching in a background task, delivering events to `consumer`.
    ///
    /// The initial state of the job is delivered as ADDED events first, so callers
    /// should not seed themselves from [`NodeWatcher::list`] as well.
    pub fn subscribe<C>(&self, mut consumer: C) -> WatchHandle
    where
        C: NodeEventConsumer + 'static,
    {
        let token = CancellationToken::new();
        let watcher = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move { watcher.run(&mut consumer, task_token).await });
        WatchHandle {
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            task,
        }
    }

    /// Run the watch loop until `cancellation_token` is cancelled or the consumer closes.
    ///
    /// Transport failures are retried with exponential backoff.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::InvalidSelector`] or [`WatcherError::NotFound`] if the API server
    ///   rejects the job's selector or namespace
    #[tracing::instrument(skip(self, consumer, cancellation_token), fields(job = %self.selector.job_name()))]
    pub async fn run<C>(
        &self,
        consumer: &mut C,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<WatcherError>>
    where
        C: NodeEventConsumer + ?Sized,
    {
        info!("Starting node watcher");
        let mut known = KnownNodes::new();
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut state = WatchState::Init;

        let result = loop {
            if cancellation_token.is_cancelled() {
                state = WatchState::Stopped;
            }
            let step = match state {
                WatchState::Init | WatchState::Reconnecting {
                    resource_version: None,
                } => {
                    self.resync(&mut known, consumer, &mut backoff, &cancellation_token)
                        .await
                }
                WatchState::Reconnecting {
                    resource_version: Some(resource_version),
                } => {
                    debug!(%resource_version, "Resuming pod watch");
                    Ok(WatchState::Watching { resource_version })
                }
                WatchState::Watching { resource_version } => {
                    self.watch(
                        resource_version,
                        &mut known,
                        consumer,
                        &mut backoff,
                        &cancellation_token,
                    )
                    .await
                }
                WatchState::Stopped => break Ok(()),
            };
            match step {
                Ok(next) => state = next,
                Err(e) => break Err(e),
            }
        };

        match result {
            Err(e) if matches!(e.current_context(), WatcherError::ConsumerClosed) => {
                info!("Node event consumer closed, stopping node watcher");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                info!("Node watcher stopped");
                Ok(())
            }
        }
    }

    /// List the job's pods and deliver whatever differs from the view.
    async fn resync<C>(
        &self,
        known: &mut KnownNodes,
        consumer: &mut C,
        backoff: &mut Backoff,
        cancellation_token: &CancellationToken,
    ) -> Result<WatchState, Report<WatcherError>>
    where
        C: NodeEventConsumer + ?Sized,
    {
        let listing = select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(WatchState::Stopped),
            listing = snapshot::list_nodes(
                self.source.as_ref(),
                &self.selector,
                self.config.request_timeout,
            ) => listing,
        };
        let snapshot = match listing {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return self
                    .retry_later(e, None, backoff, cancellation_token)
                    .await
            }
        };

        let events = known.reconcile(snapshot.nodes);
        debug!(
            events = events.len(),
            known = known.len(),
            "Reconciled node view against listing"
        );
        for event in events {
            if !deliver(consumer, event, cancellation_token).await? {
                return Ok(WatchState::Stopped);
            }
        }

        match snapshot.resource_version {
            Some(resource_version) => {
                backoff.reset();
                Ok(WatchState::Watching { resource_version })
            }
            None => {
                let e = Report::new(WatcherError::ListFailed {
                    message: "listing carried no resource version".to_string(),
                });
                self.retry_later(e, None, backoff, cancellation_token).await
            }
        }
    }

    /// Consume one watch stream until it ends, fails or is cancelled.
    async fn watch<C>(
        &self,
        mut resource_version: String,
        known: &mut KnownNodes,
        consumer: &mut C,
        backoff: &mut Backoff,
        cancellation_token: &CancellationToken,
    ) -> Result<WatchState, Report<WatcherError>>
    where
        C: NodeEventConsumer + ?Sized,
    {
        let request_timeout = self.config.request_timeout;
        let label_selector = self.selector.label_selector();
        let established = select! {
            biased;
            _ = cancellation_token.cancelled() => return Ok(WatchState::Stopped),
            established = tokio::time::timeout(
                request_timeout,
                self.source.watch_pods(&label_selector, &resource_version),
            ) => established,
        };
        let mut stream = match established {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return self
                    .retry_later(e, Some(resource_version), backoff, cancellation_token)
                    .await
            }
            Err(_) => {
                let e = Report::new(WatcherError::Timeout {
                    operation: "watch pods",
                    timeout: request_timeout,
                });
                return self
                    .retry_later(e, Some(resource_version), backoff, cancellation_token)
                    .await;
            }
        };

        let mut received_any = false;
        loop {
            let next = select! {
                biased;
                _ = cancellation_token.cancelled() => return Ok(WatchState::Stopped),
                next = stream.next() => next,
            };
            if !received_any && matches!(next, Some(Ok(_))) {
                received_any = true;
                backoff.reset();
            }

            let (event_type, pod) = match next {
                None => {
                    if received_any {
                        debug!(%resource_version, "Pod watch stream ended, resuming");
                        return Ok(WatchState::Reconnecting {
                            resource_version: Some(resource_version),
                        });
                    }
                    // An empty stream that closes at once should not be reopened in a busy loop.
                    let delay = backoff.next_delay();
                    debug!(%resource_version, ?delay, "Pod watch stream closed without events");
                    return Ok(
                        if sleep_or_cancel(delay, cancellation_token).await {
                            WatchState::Reconnecting {
                                resource_version: Some(resource_version),
                            }
                        } else {
                            WatchState::Stopped
                        },
                    );
                }
                Some(Err(e)) => {
                    return self
                        .retry_later(e, Some(resource_version), backoff, cancellation_token)
                        .await
                }
                Some(Ok(PodWatchEvent::Expired)) => {
                    info!(%resource_version, "Resource version expired, relisting pods");
                    return Ok(WatchState::Reconnecting {
                        resource_version: None,
                    });
                }
                Some(Ok(PodWatchEvent::Bookmark {
                    resource_version: bookmark,
                })) => {
                    resource_version = bookmark;
                    continue;
                }
                Some(Ok(PodWatchEvent::Added(pod))) => (NodeEventType::Added, pod),
                Some(Ok(PodWatchEvent::Modified(pod))) => (NodeEventType::Modified, pod),
                Some(Ok(PodWatchEvent::Deleted(pod))) => (NodeEventType::Deleted, pod),
            };

            if let Some(version) = pod.metadata.resource_version.as_ref() {
                resource_version.clone_from(version);
            }
            let Some(event) = self.observe(known, &pod, event_type) else {
                continue;
            };
            if !deliver(consumer, event, cancellation_token).await? {
                return Ok(WatchState::Stopped);
            }
        }
    }

    /// Translate a streamed pod and record it in the view.
    fn observe(
        &self,
        known: &mut KnownNodes,
        pod: &Pod,
        event_type: NodeEventType,
    ) -> Option<NodeEvent> {
        let belongs_to_job = pod
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| self.selector.matches(labels));
        if !belongs_to_job {
            debug!(pod = ?pod.metadata.name, "Ignoring pod of another job");
            return None;
        }

        match translate_pod(pod, event_type) {
            Ok(event) => known.apply(event),
            Err(e) => {
                warn!("Skipping pod event that cannot be translated: {e:?}");
                None
            }
        }
    }

    /// Fail on fatal errors; otherwise wait out the backoff and reconnect.
    async fn retry_later(
        &self,
        error: Report<WatcherError>,
        resource_version: Option<String>,
        backoff: &mut Backoff,
        cancellation_token: &CancellationToken,
    ) -> Result<WatchState, Report<WatcherError>> {
        if !error.current_context().is_retryable() {
            return Err(error);
        }

        let delay = backoff.next_delay();
        warn!(?delay, "Pod watch failed, retrying: {error:?}");
        if sleep_or_cancel(delay, cancellation_token).await {
            Ok(WatchState::Reconnecting { resource_version })
        } else {
            Ok(WatchState::Stopped)
        }
    }
}

/// Hand one event to the consumer. Returns `false` if cancelled while waiting.
async fn deliver<C>(
    consumer: &mut C,
    event: NodeEvent,
    cancellation_token: &CancellationToken,
) -> Result<bool, Report<WatcherError>>
where
    C: NodeEventConsumer + ?Sized,
{
    debug!(
        event_type = %event.event_type,
        node_type = %event.node.node_type,
        id = event.node.id,
        status = %event.node.status,
        "Delivering node event"
    );
    select! {
        biased;
        _ = cancellation_token.cancelled() => Ok(false),
        delivered = consumer.on_event(event) => delivered.map(|()| true),
    }
}

/// Sleep for `delay`. Returns `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancellation_token: &CancellationToken) -> bool {
    select! {
        _ = cancellation_token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Handle to a watcher started with [`NodeWatcher::subscribe`].
///
/// Dropping the handle cancels the watcher.
pub struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<Result<(), Report<WatcherError>>>,
    _cancel_on_drop: DropGuard,
}

impl WatchHandle {
    /// Stop watching. Safe to call any number of times.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher task to end.
    ///
    /// # Errors
    ///
    /// - the fatal error that ended the watcher, if any
    /// - [`WatcherError::WatchFailed`] if the watcher task panicked
    pub async fn join(self) -> Result<(), Report<WatcherError>> {
        self.task.await.map_err(|e| {
            Report::new(WatcherError::WatchFailed {
                message: "watcher task did not complete".to_string(),
            })
            .attach_printable(e.to_string())
        })?
    }
}
