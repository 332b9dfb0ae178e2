//! Point-in-time listing of a job's nodes.

use std::time::Duration;

use api_types::Node;
use api_types::NodeEventType;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;
use tracing::warn;

use crate::error::WatcherError;
use crate::k8s::labels::JobSelector;
use crate::k8s::pod_source::PodSource;
use crate::watcher::translator::pod_to_node;

/// Nodes of a job at one resource version.
#[derive(Debug, Clone, Default)]
pub struct NodeSnapshot {
    /// Ordered by node type, then id.
    pub nodes: Vec<Node>,
    pub resource_version: Option<String>,
}

/// List the nodes of the job selected by `selector`.
///
/// Pods that cannot be translated are skipped with a warning.
///
/// # Errors
///
/// - [`WatcherError::Timeout`] if the listing takes longer than `request_timeout`
/// - any error returned by [`PodSource::list_pods`]; see [`WatcherError::is_retryable`]
pub async fn list_nodes<S>(
    source: &S,
    selector: &JobSelector,
    request_timeout: Duration,
) -> Result<NodeSnapshot, Report<WatcherError>>
where
    S: PodSource + ?Sized,
{
    let list = tokio::time::timeout(request_timeout, source.list_pods(&selector.label_selector()))
        .await
        .map_err(|_| {
            Report::new(WatcherError::Timeout {
                operation: "list pods",
                timeout: request_timeout,
            })
        })??;

    let nodes = nodes_from_pods(&list.pods, selector);
    debug!(
        job = selector.job_name(),
        pods = list.pods.len(),
        nodes = nodes.len(),
        "Built node snapshot"
    );

    Ok(NodeSnapshot {
        nodes,
        resource_version: list.resource_version,
    })
}

/// Translate the pods of one job into nodes ordered by type, then id.
pub fn nodes_from_pods(pods: &[Pod], selector: &JobSelector) -> Vec<Node> {
    let mut nodes: Vec<Node> = pods
        .iter()
        .filter(|pod| {
            pod.metadata
                .labels
                .as_ref()
                .is_some_and(|labels| selector.matches(labels))
        })
        .filter_map(|pod| match pod_to_node(pod, NodeEventType::Added) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("Skipping pod that cannot be translated: {e:?}");
                None
            }
        })
        .collect();
    nodes.sort_by_key(|node| (node.node_type, node.id));
    nodes
}

#[cfg(test)]
mod tests {
    use api_types::NodeStatus;
    use api_types::NodeType;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::k8s::labels::REPLICA_TYPE_LABEL;
    use crate::k8s::mock::MockPodSource;
    use crate::k8s::mock::TestPod;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn job_pods() -> Vec<Pod> {
        vec![
            TestPod::new("test", "worker", 2).build(),
            TestPod::new("test", "worker", 0).build(),
            TestPod::new("test", "ps", 1).build(),
            TestPod::new("test", "ps", 0).build(),
            TestPod::new("test", "worker", 1).build(),
        ]
    }

    #[test(tokio::test)]
    async fn snapshot_is_ordered_by_type_then_id() {
        let source = MockPodSource::new();
        source.push_list(job_pods(), "42");
        let selector = JobSelector::new("test").unwrap();

        let snapshot = list_nodes(&source, &selector, TIMEOUT).await.unwrap();

        assert_eq!(snapshot.resource_version.as_deref(), Some("42"));
        let order: Vec<(NodeType, u32)> = snapshot
            .nodes
            .iter()
            .map(|node| (node.node_type, node.id))
            .collect();
        assert_eq!(
            order,
            vec![
                (NodeType::Ps, 0),
                (NodeType::Ps, 1),
                (NodeType::Worker, 0),
                (NodeType::Worker, 1),
                (NodeType::Worker, 2),
            ]
        );
        assert!(snapshot
            .nodes
            .iter()
            .all(|node| node.status == NodeStatus::Running));
    }

    #[test(tokio::test)]
    async fn malformed_pod_is_skipped() {
        let source = MockPodSource::new();
        let mut pods = job_pods();
        pods.push(
            TestPod::new("test", "worker", 9)
                .without_label(REPLICA_TYPE_LABEL)
                .build(),
        );
        source.push_list(pods, "1");
        let selector = JobSelector::new("test").unwrap();

        let snapshot = list_nodes(&source, &selector, TIMEOUT).await.unwrap();
        assert_eq!(snapshot.nodes.len(), 5);
    }

    #[test]
    fn other_jobs_are_ignored() {
        let mut pods = job_pods();
        pods.push(TestPod::new("other", "worker", 0).build());
        let selector = JobSelector::new("test").unwrap();
        assert_eq!(nodes_from_pods(&pods, &selector).len(), 5);
    }

    #[test(tokio::test)]
    async fn list_failure_is_surfaced() {
        let source = MockPodSource::new();
        source.push_list_error(WatcherError::ListFailed {
            message: "connection refused".to_string(),
        });
        let selector = JobSelector::new("test").unwrap();

        let err = list_nodes(&source, &selector, TIMEOUT).await.unwrap_err();
        assert_eq!(err.current_context().is_retryable(), true);
    }

    #[test(tokio::test)]
    async fn hanging_list_times_out() {
        let source = MockPodSource::new();
        source.push_list_hanging();
        let selector = JobSelector::new("test").unwrap();
        let timeout = Duration::from_millis(50);

        let err = list_nodes(&source, &selector, timeout).await.unwrap_err();
        assert_eq!(
            err.current_context(),
            &WatcherError::Timeout {
                operation: "list pods",
                timeout,
            }
        );
        assert_eq!(err.current_context().is_retryable(), true);
        assert_eq!(
            err.current_context().to_string(),
            "list pods timed out after 50ms"
        );
    }
}
