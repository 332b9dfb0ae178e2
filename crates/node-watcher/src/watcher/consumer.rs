//! Delivery of node events to the job controller.

use api_types::NodeEvent;
use async_trait::async_trait;
use error_stack::Report;
use tokio::sync::mpsc;

use crate::error::WatcherError;

/// Receives node events one at a time, in the order they are observed.
///
/// The watcher awaits each call before reading further from the watch stream, so a
/// slow consumer applies back-pressure instead of losing events.
#[async_trait]
pub trait NodeEventConsumer: Send {
    /// Handle one event.
    ///
    /// Returning [`WatcherError::ConsumerClosed`] stops the watcher.
    async fn on_event(&mut self, event: NodeEvent) -> Result<(), Report<WatcherError>>;
}

#[async_trait]
impl NodeEventConsumer for mpsc::Sender<NodeEvent> {
    async fn on_event(&mut self, event: NodeEvent) -> Result<(), Report<WatcherError>> {
        self.send(event)
            .await
            .map_err(|_| Report::new(WatcherError::ConsumerClosed))
    }
}

/// Adapts a synchronous callback into a consumer.
pub struct FnConsumer<F>(pub F);

#[async_trait]
impl<F> NodeEventConsumer for FnConsumer<F>
where
    F: FnMut(NodeEvent) + Send,
{
    async fn on_event(&mut self, event: NodeEvent) -> Result<(), Report<WatcherError>> {
        (self.0)(event);
        Ok(())
    }
}
