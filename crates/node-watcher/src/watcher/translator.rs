//! Translation of raw pods into job nodes.

use std::collections::BTreeMap;

use api_types::ExitReason;
use api_types::Node;
use api_types::NodeEvent;
use api_types::NodeEventType;
use api_types::NodeResource;
use api_types::NodeStatus;
use error_stack::Report;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::Pod;
use tracing::warn;

use crate::error::TranslateError;
use crate::k8s::labels;
use crate::k8s::labels::NodeKey;
use crate::k8s::quantity;
use crate::watcher::classifier::classify_exit;

/// Extended resource name under which GPUs are requested.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Translate one pod observation into a node event.
///
/// # Errors
///
/// - [`TranslateError::MissingName`] if the pod has no name
/// - [`TranslateError::MissingLabel`], [`TranslateError::UnknownRole`] or
///   [`TranslateError::InvalidIndex`] if the pod's identity labels are unusable
pub fn translate_pod(
    pod: &Pod,
    event_type: NodeEventType,
) -> Result<NodeEvent, Report<TranslateError>> {
    Ok(NodeEvent::new(event_type, pod_to_node(pod, event_type)?))
}

/// Build the node a pod represents.
///
/// # Errors
///
/// See [`translate_pod`].
pub fn pod_to_node(pod: &Pod, event_type: NodeEventType) -> Result<Node, Report<TranslateError>> {
    let metadata = &pod.metadata;
    let pod_name = metadata
        .name
        .as_deref()
        .ok_or_else(|| Report::new(TranslateError::MissingName))?;
    let empty = BTreeMap::new();
    let pod_labels = metadata.labels.as_ref().unwrap_or(&empty);

    let key = NodeKey::from_pod_labels(pod_name, pod_labels)?;
    let mut node = Node::new(key.job, key.node_type, key.index);
    node.name = pod_name.to_string();
    node.rank_index = labels::rank_index(pod_name, pod_labels).unwrap_or_else(|e| {
        warn!("Ignoring rank of pod {pod_name}: {e:?}");
        None
    });
    node.create_time = metadata.creation_timestamp.as_ref().map(|time| time.0);

    let primary_container = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first());
    node.config_resource = primary_container
        .map(|container| config_resource(pod_name, container))
        .unwrap_or_default();
    node.host_name = pod.spec.as_ref().and_then(|spec| spec.node_name.clone());

    let status = pod.status.as_ref();
    node.host_ip = status.and_then(|status| status.host_ip.clone());
    node.status = NodeStatus::from_phase(status.and_then(|status| status.phase.as_deref()));

    let container_state = primary_container_state(pod, primary_container);
    if let Some(state) = container_state {
        node.start_time = state
            .running
            .as_ref()
            .and_then(|running| running.started_at.as_ref())
            .or_else(|| {
                state
                    .terminated
                    .as_ref()
                    .and_then(|terminated| terminated.started_at.as_ref())
            })
            .map(|time| time.0);

        if let Some(terminated) = state
            .terminated
            .as_ref()
            .filter(|terminated| terminated.exit_code != 0)
        {
            node.exit_reason = Some(classify_exit(
                terminated.reason.as_deref(),
                terminated.exit_code,
            ));
            node.status = NodeStatus::Failed;
        }
    }

    if node.status == NodeStatus::Failed && node.exit_reason.is_none() {
        node.exit_reason = Some(ExitReason::Unknown);
    }
    if event_type == NodeEventType::Deleted {
        node.status = NodeStatus::Deleted;
    }

    Ok(node)
}

/// State of the container the job runs in: the status named like the first
/// container of the pod spec, falling back to the first reported status.
fn primary_container_state<'a>(
    pod: &'a Pod,
    primary_container: Option<&Container>,
) -> Option<&'a ContainerState> {
    let statuses = pod.status.as_ref()?.container_statuses.as_ref()?;
    primary_container
        .and_then(|container| {
            statuses
                .iter()
                .find(|status| status.name == container.name)
        })
        .or_else(|| statuses.first())?
        .state
        .as_ref()
}

/// Requested resources of a container; absent or malformed quantities count as zero.
fn config_resource(pod_name: &str, container: &Container) -> NodeResource {
    let Some(requests) = container
        .resources
        .as_ref()
        .and_then(|resources| resources.requests.as_ref())
    else {
        return NodeResource::default();
    };

    let mut resource = NodeResource::default();
    if let Some(cpu) = requests.get("cpu") {
        resource.cpu = quantity::parse_cpu(&cpu.0).unwrap_or_else(|e| {
            warn!("Ignoring cpu request of pod {pod_name}: {e:?}");
            0.0
        });
    }
    if let Some(memory) = requests.get("memory") {
        resource.memory = quantity::parse_memory(&memory.0).unwrap_or_else(|e| {
            warn!("Ignoring memory request of pod {pod_name}: {e:?}");
            0
        });
    }
    if let Some(gpu) = requests.get(GPU_RESOURCE) {
        resource.gpu = quantity::parse_count(&gpu.0).unwrap_or_else(|e| {
            warn!("Ignoring gpu request of pod {pod_name}: {e:?}");
            0
        });
    }
    resource
}
