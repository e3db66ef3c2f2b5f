//! Producer
//!
//! The write side of a periodic batch processor. A [`BatchProducer`] is a
//! cheap, cloneable handle around the unbounded ingestion channel; any number
//! of tasks or threads may publish through their own clone.

use crate::batch::{failure_handler::FailureHandler, metrics::BatchMetrics, BatchError, Result};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Cloneable publishing handle of a periodic batch processor
///
/// Publishing never blocks: the ingestion channel is unbounded, so there is
/// no backpressure on the caller. Items published from one handle keep their
/// relative order all the way to the batch handler.
pub struct BatchProducer<T> {
    sender: UnboundedSender<T>,
    name: Arc<str>,
    failure_handler: Arc<dyn FailureHandler<T>>,
    metrics: Arc<BatchMetrics>,
}

impl<T> BatchProducer<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        sender: UnboundedSender<T>,
        name: Arc<str>,
        failure_handler: Arc<dyn FailureHandler<T>>,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        Self {
            sender,
            name,
            failure_handler,
            metrics,
        }
    }

    /// Publish an item, fire-and-forget
    ///
    /// If the processor no longer accepts items the failure is reported to the
    /// processor's failure handler (which logs it by default) and the item is
    /// discarded. Use [`try_publish`](Self::try_publish) to observe the outcome.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// producer.publish(AuditRecord::new("login", user_id));
    /// ```
    pub fn publish(&self, item: T) {
        if let Err(error) = self.try_publish(item) {
            self.metrics.record_publish_failure();
            self.failure_handler.on_publish_failure(&self.name, &error);
        }
    }

    /// Publish an item, reporting whether the ingestion channel accepted it
    ///
    /// Returns [`BatchError::ChannelClosed`] once the processor has been shut
    /// down. Acceptance does not mean the item has been handled yet.
    pub fn try_publish(&self, item: T) -> Result<()> {
        self.sender
            .send(item)
            .map_err(|_| BatchError::ChannelClosed)?;
        self.metrics.record_published();
        Ok(())
    }

    /// Whether the processor stopped accepting items
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Name of the processor this handle publishes to
    pub fn processor_name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for BatchProducer<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            name: Arc::clone(&self.name),
            failure_handler: Arc::clone(&self.failure_handler),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<T> fmt::Debug for BatchProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProducer")
            .field("processor", &self.name)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}
