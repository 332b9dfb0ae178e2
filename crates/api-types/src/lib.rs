//! Shared API type definitions
//!
//! This crate contains the job-centric node model shared between the node watcher
//! and the job controller consuming its events: nodes, their roles and lifecycle
//! phases, exit reasons and the events emitted when a node changes.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Role a node performs within a distributed training job.
///
/// Variants are declared in enumeration order: parameter servers come first, so
/// sorting nodes by `(NodeType, id)` yields the order job controllers expect.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[display("ps")]
    Ps,
    #[display("worker")]
    Worker,
    #[display("chief")]
    Chief,
    #[display("evaluator")]
    Evaluator,
    #[display("dlrover-master")]
    #[serde(rename = "dlrover-master")]
    Master,
}

impl NodeType {
    pub const ALL: [NodeType; 5] = [
        NodeType::Ps,
        NodeType::Worker,
        NodeType::Chief,
        NodeType::Evaluator,
        NodeType::Master,
    ];

    /// Parse the replica-type label value used by the job submitter.
    pub fn from_label(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|node_type| node_type.as_label() == value)
    }

    pub const fn as_label(self) -> &'static str {
        match self {
            NodeType::Ps => "ps",
            NodeType::Worker => "worker",
            NodeType::Chief => "chief",
            NodeType::Evaluator => "evaluator",
            NodeType::Master => "dlrover-master",
        }
    }
}

/// Lifecycle phase of a node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    #[display("PENDING")]
    Pending,
    #[display("RUNNING")]
    Running,
    #[display("SUCCEEDED")]
    Succeeded,
    #[display("FAILED")]
    Failed,
    #[display("DELETED")]
    Deleted,
    #[display("UNKNOWN")]
    Unknown,
}

impl NodeStatus {
    /// Map an orchestrator pod phase onto a node status.
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => NodeStatus::Pending,
            Some("Running") => NodeStatus::Running,
            Some("Succeeded") => NodeStatus::Succeeded,
            Some("Failed") => NodeStatus::Failed,
            _ => NodeStatus::Unknown,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Deleted
        )
    }
}

/// Why a node's container terminated abnormally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    #[display("OOM")]
    Oom,
    #[display("KILLED")]
    Killed,
    #[display("FATAL_ERROR")]
    FatalError,
    #[display("UNKNOWN")]
    Unknown,
}

/// Resources requested for a node's primary container.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeResource {
    /// CPU cores
    pub cpu: f64,
    /// Memory in bytes
    pub memory: u64,
    /// Number of GPUs
    pub gpu: u32,
}

/// One task of a training job, derived from the pod running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Name of the job this node belongs to
    pub job: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Task index within the node type
    pub id: u32,
    /// Pod name
    pub name: String,
    /// Rank of the node among all training processes, when assigned
    pub rank_index: Option<u32>,
    pub status: NodeStatus,
    /// When the primary container started running
    pub start_time: Option<DateTime<Utc>>,
    /// When the pod object was created
    pub create_time: Option<DateTime<Utc>>,
    pub config_resource: NodeResource,
    pub exit_reason: Option<ExitReason>,
    /// Name of the machine the pod is scheduled on
    pub host_name: Option<String>,
    pub host_ip: Option<String>,
}

impl Node {
    pub fn new(job: impl Into<String>, node_type: NodeType, id: u32) -> Self {
        Self {
            job: job.into(),
            node_type,
            id,
            name: String::new(),
            rank_index: None,
            status: NodeStatus::Unknown,
            start_time: None,
            create_time: None,
            config_resource: NodeResource::default(),
            exit_reason: None,
            host_name: None,
            host_ip: None,
        }
    }
}

/// Kind of change observed for a node, mirroring the orchestrator's event kinds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeEventType {
    #[display("ADDED")]
    Added,
    #[display("MODIFIED")]
    Modified,
    #[display("DELETED")]
    Deleted,
}

/// A full node snapshot together with the kind of change that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEvent {
    pub event_type: NodeEventType,
    pub node: Node,
}

impl NodeEvent {
    pub fn new(event_type: NodeEventType, node: Node) -> Self {
        Self { event_type, node }
    }
}
