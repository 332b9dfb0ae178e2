//! The watcher's own record of the nodes it has already reported.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use api_types::Node;
use api_types::NodeEvent;
use api_types::NodeEventType;
use api_types::NodeStatus;

use crate::k8s::labels::NodeKey;

/// Last delivered state of every node seen by one watcher.
///
/// Deleted nodes stay in the view as terminal records so that a later relist does
/// not report their deletion again.
#[derive(Debug, Default)]
pub struct KnownNodes {
    nodes: BTreeMap<NodeKey, Node>,
}

impl KnownNodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Record a streamed event, returning the event to deliver, if any.
    ///
    /// An ADDED event for a node that is already live is a replay: it is dropped when
    /// nothing changed and reported as MODIFIED otherwise. A repeated DELETED for a
    /// node already recorded as deleted is dropped.
    pub fn apply(&mut self, mut event: NodeEvent) -> Option<NodeEvent> {
        let key = NodeKey::from(&event.node);
        let previous = self.nodes.get(&key);

        match event.event_type {
            NodeEventType::Added => {
                if let Some(previous) =
                    previous.filter(|previous| previous.status != NodeStatus::Deleted)
                {
                    if previous == &event.node {
                        return None;
                    }
                    event.event_type = NodeEventType::Modified;
                }
            }
            NodeEventType::Deleted => {
                if previous.is_some_and(|previous| previous.status == NodeStatus::Deleted) {
                    return None;
                }
            }
            NodeEventType::Modified => {}
        }

        self.nodes.insert(key, event.node.clone());
        Some(event)
    }

    /// Reconcile the view against a fresh listing.
    ///
    /// Returns ADDED for nodes not live in the view, MODIFIED for nodes whose state
    /// changed, and DELETED for live nodes missing from the listing, in that order.
    pub fn reconcile(&mut self, listed: Vec<Node>) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        let mut seen = BTreeSet::new();

        for node in listed {
            let key = NodeKey::from(&node);
            seen.insert(key.clone());
            let event_type = match self.nodes.get(&key) {
                Some(previous) if previous.status == NodeStatus::Deleted => NodeEventType::Added,
                Some(previous) if previous == &node => continue,
                Some(_) => NodeEventType::Modified,
                None => NodeEventType::Added,
            };
            self.nodes.insert(key, node.clone());
            events.push(NodeEvent::new(event_type, node));
        }

        for (key, node) in self.nodes.iter_mut() {
            if seen.contains(key) || node.status == NodeStatus::Deleted {
                continue;
            }
            node.status = NodeStatus::Deleted;
            events.push(NodeEvent::new(NodeEventType::Deleted, node.clone()));
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use api_types::NodeType;
    use similar_asserts::assert_eq;

    use super::*;

    fn node(node_type: NodeType, id: u32, status: NodeStatus) -> Node {
        let mut node = Node::new("test", node_type, id);
        node.status = status;
        node
    }

    fn kinds(events: &[NodeEvent]) -> Vec<(NodeEventType, NodeType, u32)> {
        events
            .iter()
            .map(|event| (event.event_type, event.node.node_type, event.node.id))
            .collect()
    }

    #[test]
    fn first_reconcile_adds_everything() {
        let mut view = KnownNodes::new();
        let events = view.reconcile(vec![
            node(NodeType::Ps, 0, NodeStatus::Running),
            node(NodeType::Worker, 0, NodeStatus::Pending),
        ]);
        assert_eq!(
            kinds(&events),
            vec![
                (NodeEventType::Added, NodeType::Ps, 0),
                (NodeEventType::Added, NodeType::Worker, 0),
            ]
        );
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn relist_reports_only_differences() {
        let mut view = KnownNodes::new();
        view.reconcile(vec![
            node(NodeType::Ps, 0, NodeStatus::Running),
            node(NodeType::Worker, 0, NodeStatus::Running),
            node(NodeType::Worker, 1, NodeStatus::Running),
        ]);

        let events = view.reconcile(vec![
            node(NodeType::Ps, 0, NodeStatus::Running),
            node(NodeType::Worker, 0, NodeStatus::Failed),
            node(NodeType::Worker, 2, NodeStatus::Pending),
        ]);

        assert_eq!(
            kinds(&events),
            vec![
                (NodeEventType::Modified, NodeType::Worker, 0),
                (NodeEventType::Added, NodeType::Worker, 2),
                (NodeEventType::Deleted, NodeType::Worker, 1),
            ]
        );
        assert_eq!(events[2].node.status, NodeStatus::Deleted);
    }

    #[test]
    fn deleted_nodes_are_not_deleted_twice() {
        let mut view = KnownNodes::new();
        view.reconcile(vec![node(NodeType::Worker, 0, NodeStatus::Running)]);
        assert_eq!(view.reconcile(Vec::new()).len(), 1);
        assert_eq!(view.reconcile(Vec::new()).len(), 0);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn replayed_added_is_dropped_or_downgraded() {
        let mut view = KnownNodes::new();
        let running = node(NodeType::Worker, 0, NodeStatus::Running);
        view.reconcile(vec![running.clone()]);

        let replay = NodeEvent::new(NodeEventType::Added, running);
        assert_eq!(view.apply(replay), None);

        let failed = node(NodeType::Worker, 0, NodeStatus::Failed);
        let delivered = view
            .apply(NodeEvent::new(NodeEventType::Added, failed))
            .unwrap();
        assert_eq!(delivered.event_type, NodeEventType::Modified);
    }

    #[test]
    fn streamed_events_pass_through() {
        let mut view = KnownNodes::new();
        let added = NodeEvent::new(
            NodeEventType::Added,
            node(NodeType::Worker, 0, NodeStatus::Pending),
        );
        assert_eq!(view.apply(added.clone()), Some(added));

        let modified = NodeEvent::new(
            NodeEventType::Modified,
            node(NodeType::Worker, 0, NodeStatus::Running),
        );
        assert_eq!(view.apply(modified.clone()), Some(modified));

        let deleted = NodeEvent::new(
            NodeEventType::Deleted,
            node(NodeType::Worker, 0, NodeStatus::Deleted),
        );
        assert_eq!(view.apply(deleted.clone()), Some(deleted.clone()));
        assert_eq!(view.apply(deleted), None);
    }

    #[test]
    fn node_readded_after_deletion_is_added() {
        let mut view = KnownNodes::new();
        view.reconcile(vec![node(NodeType::Worker, 0, NodeStatus::Running)]);
        view.reconcile(Vec::new());
        let events = view.reconcile(vec![node(NodeType::Worker, 0, NodeStatus::Pending)]);
        assert_eq!(kinds(&events), vec![(NodeEventType::Added, NodeType::Worker, 0)]);
    }
}
