//! Kubernetes side of the watcher: pod labels, quantities and the pod source seam.

pub mod kube_source;
pub mod labels;
pub mod mock;
pub mod pod_source;
pub mod quantity;

pub use kube_source::KubePodSource;
pub use labels::JobSelector;
pub use labels::NodeKey;
pub use pod_source::PodEventStream;
pub use pod_source::PodList;
pub use pod_source::PodSource;
pub use pod_source::PodWatchEvent;
