//! Error kinds raised while observing a job's pods.

use core::error::Error;
use std::time::Duration;

/// Errors that can occur while listing or watching pods.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum WatcherError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to list pods: {message}")]
    ListFailed { message: String },
    #[display("Failed to watch pods: {message}")]
    WatchFailed { message: String },
    #[display("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[display("Invalid pod selector: {message}")]
    InvalidSelector { message: String },
    #[display("Not found: {message}")]
    NotFound { message: String },
    #[display("Node event consumer is closed")]
    ConsumerClosed,
}

impl WatcherError {
    /// Whether retrying the same call may succeed.
    ///
    /// An invalid selector or a missing namespace will not fix itself, and a closed
    /// consumer leaves nobody to deliver events to.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            WatcherError::InvalidSelector { .. }
                | WatcherError::NotFound { .. }
                | WatcherError::ConsumerClosed
        )
    }
}

impl Error for WatcherError {}

/// Reasons a pod cannot be translated into a node.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum TranslateError {
    #[display("Pod {pod_name} is missing label {key}")]
    MissingLabel { pod_name: String, key: &'static str },
    #[display("Pod {pod_name} has invalid index {value:?} in label {key}")]
    InvalidIndex {
        pod_name: String,
        key: &'static str,
        value: String,
    },
    #[display("Pod {pod_name} has unknown replica type {value:?}")]
    UnknownRole { pod_name: String, value: String },
    #[display("Invalid {resource} quantity {value:?}")]
    InvalidQuantity {
        resource: &'static str,
        value: String,
    },
    #[display("Pod has no name")]
    MissingName,
}

impl Error for TranslateError {}
