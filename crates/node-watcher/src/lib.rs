pub mod config;
pub mod error;
pub mod k8s;
pub mod watcher;

pub use api_types::ExitReason;
pub use api_types::Node;
pub use api_types::NodeEvent;
pub use api_types::NodeEventType;
pub use api_types::NodeResource;
pub use api_types::NodeStatus;
pub use api_types::NodeType;
pub use error::TranslateError;
pub use error::WatcherError;
pub use watcher::NodeWatcher;
pub use watcher::WatchHandle;
