use std::collections::BTreeMap;
use std::fmt;

use api_types::Node;
use api_types::NodeType;
use error_stack::Report;

use crate::error::TranslateError;
use crate::error::WatcherError;

/// Label carrying the name of the elastic job a pod belongs to.
pub const JOB_NAME_LABEL: &str = "elasticjob.dlrover/name";
/// Label carrying the node type (`ps`, `worker`, ...) of a pod.
pub const REPLICA_TYPE_LABEL: &str = "elasticjob.dlrover/replica-type";
/// Label carrying the task index of a pod within its node type.
pub const REPLICA_INDEX_LABEL: &str = "elasticjob.dlrover/replica-index";
/// Label carrying the rank of a pod among all training processes.
pub const RANK_INDEX_LABEL: &str = "elasticjob.dlrover/rank-index";

const MAX_LABEL_VALUE_LEN: usize = 63;

/// Identity of a node within a job, parsed from the labels the job submitter
/// attaches to each pod.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    pub job: String,
    pub node_type: NodeType,
    pub index: u32,
}

impl NodeKey {
    /// Parse the node identity from pod labels.
    ///
    /// # Errors
    ///
    /// - [`TranslateError::MissingLabel`] if the job, type or index label is absent
    /// - [`TranslateError::UnknownRole`] if the type label is not a known node type
    /// - [`TranslateError::InvalidIndex`] if the index label is not a non-negative integer
    pub fn from_pod_labels(
        pod_name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Self, Report<TranslateError>> {
        let job = required_label(pod_name, labels, JOB_NAME_LABEL)?;
        let role = required_label(pod_name, labels, REPLICA_TYPE_LABEL)?;
        let node_type = NodeType::from_label(role).ok_or_else(|| {
            Report::new(TranslateError::UnknownRole {
                pod_name: pod_name.to_string(),
                value: role.to_string(),
            })
        })?;
        let index = parse_index(
            pod_name,
            REPLICA_INDEX_LABEL,
            required_label(pod_name, labels, REPLICA_INDEX_LABEL)?,
        )?;

        Ok(Self {
            job: job.to_string(),
            node_type,
            index,
        })
    }
}

impl From<&Node> for NodeKey {
    fn from(node: &Node) -> Self {
        Self {
            job: node.job.clone(),
            node_type: node.node_type,
            index: node.id,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.job, self.node_type, self.index)
    }
}

/// Parse the optional rank label.
///
/// # Errors
///
/// - [`TranslateError::InvalidIndex`] if the label is present but not a non-negative integer
pub fn rank_index(
    pod_name: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Option<u32>, Report<TranslateError>> {
    labels
        .get(RANK_INDEX_LABEL)
        .map(|value| parse_index(pod_name, RANK_INDEX_LABEL, value))
        .transpose()
}

fn required_label<'a>(
    pod_name: &str,
    labels: &'a BTreeMap<String, String>,
    key: &'static str,
) -> Result<&'a str, Report<TranslateError>> {
    labels.get(key).map(String::as_str).ok_or_else(|| {
        Report::new(TranslateError::MissingLabel {
            pod_name: pod_name.to_string(),
            key,
        })
    })
}

fn parse_index(
    pod_name: &str,
    key: &'static str,
    value: &str,
) -> Result<u32, Report<TranslateError>> {
    value.trim().parse::<u32>().map_err(|e| {
        Report::new(TranslateError::InvalidIndex {
            pod_name: pod_name.to_string(),
            key,
            value: value.to_string(),
        })
        .attach_printable(e.to_string())
    })
}

/// Selects the pods of one elastic job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSelector {
    job_name: String,
}

impl JobSelector {
    /// Create a selector for `job_name`.
    ///
    /// # Errors
    ///
    /// - [`WatcherError::InvalidSelector`] if the name is not a valid Kubernetes label value
    pub fn new(job_name: impl Into<String>) -> Result<Self, Report<WatcherError>> {
        let job_name = job_name.into();
        validate_label_value(&job_name)?;
        Ok(Self { job_name })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// Label selector string understood by the API server.
    pub fn label_selector(&self) -> String {
        format!("{JOB_NAME_LABEL}={}", self.job_name)
    }

    /// Whether a pod with `labels` belongs to this job.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(JOB_NAME_LABEL) == Some(&self.job_name)
    }
}

fn validate_label_value(value: &str) -> Result<(), Report<WatcherError>> {
    let invalid = |reason: &str| {
        Report::new(WatcherError::InvalidSelector {
            message: format!("job name {value:?} {reason}"),
        })
    };

    if value.is_empty() {
        return Err(invalid("is empty"));
    }
    if value.len() > MAX_LABEL_VALUE_LEN {
        return Err(invalid("is longer than 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("contains characters other than [A-Za-z0-9-_.]"));
    }
    let starts_and_ends_alphanumeric = value
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && value
            .chars()
            .last()
            .is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_and_ends_alphanumeric {
        return Err(invalid("must start and end with an alphanumeric character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_node_key() {
        let labels = labels(&[
            (JOB_NAME_LABEL, "mnist"),
            (REPLICA_TYPE_LABEL, "worker"),
            (REPLICA_INDEX_LABEL, "2"),
        ]);
        let key = NodeKey::from_pod_labels("mnist-worker-2", &labels).unwrap();
        assert_eq!(
            key,
            NodeKey {
                job: "mnist".to_string(),
                node_type: NodeType::Worker,
                index: 2,
            }
        );
        assert_eq!(key.to_string(), "mnist/worker-2");
    }

    #[test]
    fn missing_index_label_fails_closed() {
        let labels = labels(&[(JOB_NAME_LABEL, "mnist"), (REPLICA_TYPE_LABEL, "ps")]);
        let err = NodeKey::from_pod_labels("mnist-ps-0", &labels).unwrap_err();
        assert_eq!(
            err.current_context(),
            &TranslateError::MissingLabel {
                pod_name: "mnist-ps-0".to_string(),
                key: REPLICA_INDEX_LABEL,
            }
        );
    }

    #[test]
    fn negative_index_is_invalid() {
        let labels = labels(&[
            (JOB_NAME_LABEL, "mnist"),
            (REPLICA_TYPE_LABEL, "ps"),
            (REPLICA_INDEX_LABEL, "-1"),
        ]);
        let err = NodeKey::from_pod_labels("p", &labels).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TranslateError::InvalidIndex { .. }
        ));
    }

    #[test]
    fn unknown_role_is_rejected() {
        let labels = labels(&[
            (JOB_NAME_LABEL, "mnist"),
            (REPLICA_TYPE_LABEL, "launcher"),
            (REPLICA_INDEX_LABEL, "0"),
        ]);
        let err = NodeKey::from_pod_labels("p", &labels).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TranslateError::UnknownRole { .. }
        ));
    }

    #[test]
    fn rank_index_is_optional() {
        assert_eq!(rank_index("p", &BTreeMap::new()).unwrap(), None);
        let labels = labels(&[(RANK_INDEX_LABEL, "7")]);
        assert_eq!(rank_index("p", &labels).unwrap(), Some(7));
    }

    #[test]
    fn selector_validation() {
        let selector = JobSelector::new("mnist-1").unwrap();
        assert_eq!(selector.label_selector(), "elasticjob.dlrover/name=mnist-1");

        assert!(JobSelector::new("").is_err());
        assert!(JobSelector::new("-mnist").is_err());
        assert!(JobSelector::new("mnist,app=x").is_err());
        assert!(JobSelector::new("a".repeat(64)).is_err());
        assert!(JobSelector::new("a".repeat(63)).is_ok());
    }

    #[test]
    fn selector_matches_job_label() {
        let selector = JobSelector::new("mnist").unwrap();
        assert!(selector.matches(&labels(&[(JOB_NAME_LABEL, "mnist")])));
        assert!(!selector.matches(&labels(&[(JOB_NAME_LABEL, "other")])));
        assert!(!selector.matches(&BTreeMap::new()));
    }
}
