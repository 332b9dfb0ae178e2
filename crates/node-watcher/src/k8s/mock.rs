//! Test adapters for the pod source seam
//!
//! [`MockPodSource`] replays scripted list results and watch sessions, and
//! [`TestPod`] builds pods carrying the labels and statuses the translator reads.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use futures::future;
use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::ContainerStateRunning;
use k8s_openapi::api::core::v1::ContainerStateTerminated;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use crate::error::WatcherError;
use crate::k8s::labels::JOB_NAME_LABEL;
use crate::k8s::labels::REPLICA_INDEX_LABEL;
use crate::k8s::labels::REPLICA_TYPE_LABEL;
use crate::k8s::pod_source::PodEventStream;
use crate::k8s::pod_source::PodList;
use crate::k8s::pod_source::PodSource;
use crate::k8s::pod_source::PodWatchEvent;

/// A scripted response to one `watch_pods` call.
#[derive(Debug, Clone)]
pub enum WatchSession {
    /// Deliver the events, then end the stream.
    Closing(Vec<Result<PodWatchEvent, WatcherError>>),
    /// Deliver the events, then keep the stream open without further events.
    Open(Vec<Result<PodWatchEvent, WatcherError>>),
    /// Fail to establish the watch.
    Rejected(WatcherError),
    /// Never answer the watch request.
    Hanging,
}

#[derive(Debug, Clone)]
enum ListResponse {
    Pods(PodList),
    Failed(WatcherError),
    Hanging,
}

#[derive(Default)]
struct MockState {
    lists: VecDeque<ListResponse>,
    last_list: PodList,
    sessions: VecDeque<WatchSession>,
    list_calls: usize,
    watch_versions: Vec<String>,
}

/// Pod source replaying scripted responses.
///
/// Once the scripted lists run out, the last successful list is returned again.
/// Once the scripted watch sessions run out, watches stay open forever.
#[derive(Default)]
pub struct MockPodSource {
    state: Mutex<MockState>,
}

impl MockPodSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_list(&self, pods: Vec<Pod>, resource_version: &str) {
        self.state
            .lock()
            .unwrap()
            .lists
            .push_back(ListResponse::Pods(PodList {
                pods,
                resource_version: Some(resource_version.to_string()),
            }));
    }

    pub fn push_list_error(&self, error: WatcherError) {
        self.state
            .lock()
            .unwrap()
            .lists
            .push_back(ListResponse::Failed(error));
    }

    /// Script a list call that never answers.
    pub fn push_list_hanging(&self) {
        self.state
            .lock()
            .unwrap()
            .lists
            .push_back(ListResponse::Hanging);
    }

    pub fn push_watch(&self, session: WatchSession) {
        self.state.lock().unwrap().sessions.push_back(session);
    }

    /// Number of `list_pods` calls made so far.
    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Resource versions passed to each `watch_pods` call, in call order.
    pub fn watch_versions(&self) -> Vec<String> {
        self.state.lock().unwrap().watch_versions.clone()
    }
}

#[async_trait]
impl PodSource for MockPodSource {
    async fn list_pods(&self, label_selector: &str) -> Result<PodList, Report<WatcherError>> {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            let response = state
                .lists
                .pop_front()
                .unwrap_or_else(|| ListResponse::Pods(state.last_list.clone()));
            if let ListResponse::Pods(list) = &response {
                state.last_list = list.clone();
            }
            response
        };
        match response {
            ListResponse::Pods(mut list) => {
                list.pods.retain(|pod| matches_selector(pod, label_selector));
                Ok(list)
            }
            ListResponse::Failed(error) => Err(Report::new(error)),
            ListResponse::Hanging => future::pending().await,
        }
    }

    async fn watch_pods(
        &self,
        _label_selector: &str,
        resource_version: &str,
    ) -> Result<PodEventStream, Report<WatcherError>> {
        let session = {
            let mut state = self.state.lock().unwrap();
            state.watch_versions.push(resource_version.to_string());
            state
                .sessions
                .pop_front()
                .unwrap_or(WatchSession::Open(Vec::new()))
        };

        let into_results = |events: Vec<Result<PodWatchEvent, WatcherError>>| {
            events
                .into_iter()
                .map(|event| event.map_err(Report::new))
                .collect::<Vec<_>>()
        };

        match session {
            WatchSession::Closing(events) => Ok(stream::iter(into_results(events)).boxed()),
            WatchSession::Open(events) => Ok(stream::iter(into_results(events))
                .chain(stream::pending())
                .boxed()),
            WatchSession::Rejected(error) => Err(Report::new(error)),
            WatchSession::Hanging => future::pending().await,
        }
    }
}

/// Only the `key=value` selectors built by `JobSelector` are understood.
fn matches_selector(pod: &Pod, label_selector: &str) -> bool {
    let Some((key, value)) = label_selector.split_once('=') else {
        return true;
    };
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

/// Builder for pods as the job submitter creates them.
#[derive(Debug, Clone)]
pub struct TestPod {
    pod: Pod,
}

impl TestPod {
    /// A running pod of `job` with the given replica type label and index.
    pub fn new(job: &str, replica_type: &str, index: u32) -> Self {
        let labels = BTreeMap::from([
            (JOB_NAME_LABEL.to_string(), job.to_string()),
            (REPLICA_TYPE_LABEL.to_string(), replica_type.to_string()),
            (REPLICA_INDEX_LABEL.to_string(), index.to_string()),
        ]);
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(format!("{job}-{replica_type}-{index}")),
                namespace: Some("default".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "main".to_string(),
                    state: Some(ContainerState::default()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };
        Self { pod }
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn without_label(mut self, key: &str) -> Self {
        if let Some(labels) = self.pod.metadata.labels.as_mut() {
            labels.remove(key);
        }
        self
    }

    pub fn resource_version(mut self, resource_version: &str) -> Self {
        self.pod.metadata.resource_version = Some(resource_version.to_string());
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.status().phase = Some(phase.to_string());
        self
    }

    pub fn host(mut self, host_name: &str, host_ip: &str) -> Self {
        if let Some(spec) = self.pod.spec.as_mut() {
            spec.node_name = Some(host_name.to_string());
        }
        self.status().host_ip = Some(host_ip.to_string());
        self
    }

    /// Set the primary container's resource requests.
    pub fn requests(mut self, requests: &[(&str, &str)]) -> Self {
        let requests = requests
            .iter()
            .map(|(name, quantity)| (name.to_string(), Quantity(quantity.to_string())))
            .collect();
        if let Some(container) = self
            .pod
            .spec
            .as_mut()
            .and_then(|spec| spec.containers.first_mut())
        {
            container.resources = Some(ResourceRequirements {
                requests: Some(requests),
                ..Default::default()
            });
        }
        self
    }

    pub fn running_since(mut self, started_at: DateTime<Utc>) -> Self {
        self.container_state().running = Some(ContainerStateRunning {
            started_at: Some(Time(started_at)),
        });
        self
    }

    /// Mark the primary container terminated.
    pub fn terminated(mut self, reason: Option<&str>, exit_code: i32) -> Self {
        let state = self.container_state();
        let started_at = state
            .running
            .take()
            .and_then(|running| running.started_at);
        state.terminated = Some(ContainerStateTerminated {
            exit_code,
            reason: reason.map(str::to_string),
            started_at,
            ..Default::default()
        });
        self
    }

    pub fn without_status(mut self) -> Self {
        self.pod.status = None;
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }

    fn status(&mut self) -> &mut PodStatus {
        self.pod.status.get_or_insert_with(PodStatus::default)
    }

    fn container_state(&mut self) -> &mut ContainerState {
        let statuses = self
            .status()
            .container_statuses
            .get_or_insert_with(Vec::new);
        if statuses.is_empty() {
            statuses.push(ContainerStatus {
                name: "main".to_string(),
                ..Default::default()
            });
        }
        statuses[0].state.get_or_insert_with(ContainerState::default)
    }
}

impl From<TestPod> for Pod {
    fn from(pod: TestPod) -> Self {
        pod.build()
    }
}
