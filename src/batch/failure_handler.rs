//! Failure Handler Implementation
//!
//! Failures inside the processor are never raised to the caller that caused
//! them. Instead they are reported to a [`FailureHandler`], which by default
//! logs them. Custom handlers can count, alert, or forward dropped batches to
//! a dead-letter store.

use crate::batch::BatchError;
use std::marker::PhantomData;

/// Handler for failures that occur while publishing or dispatching
///
/// # Type Parameters
/// * `T` - The item type being batched
pub trait FailureHandler<T>: Send + Sync {
    /// Handle a batch that failed after all attempts and is being dropped
    ///
    /// # Arguments
    /// * `processor` - Name of the processor that dispatched the batch
    /// * `error` - The error of the last attempt
    /// * `batch` - The items of the dropped batch, in publish order
    fn on_batch_failure(&self, processor: &str, error: &BatchError, batch: &[T]);

    /// Handle an item that could not be published
    ///
    /// # Arguments
    /// * `processor` - Name of the processor the item was published to
    /// * `error` - Why the item was rejected
    fn on_publish_failure(&self, processor: &str, error: &BatchError);
}

/// Default failure handler that logs every failure at error level
#[derive(Debug)]
pub struct LoggingFailureHandler<T> {
    _phantom: PhantomData<fn(&T)>,
}

impl<T> LoggingFailureHandler<T> {
    /// Create a new logging failure handler
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for LoggingFailureHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FailureHandler<T> for LoggingFailureHandler<T> {
    fn on_batch_failure(&self, processor: &str, error: &BatchError, batch: &[T]) {
        tracing::error!(
            processor,
            batch_len = batch.len(),
            error = %error,
            "Fail to handle periodic batch, dropping it"
        );
    }

    fn on_publish_failure(&self, processor: &str, error: &BatchError) {
        tracing::error!(
            processor,
            error = %error,
            "Fail to publish message to periodic batch"
        );
    }
}

/// Failure handler that ignores all failures
///
/// Use with caution: dropped batches become invisible.
#[derive(Debug)]
pub struct IgnoreFailureHandler<T> {
    _phantom: PhantomData<fn(&T)>,
}

impl<T> IgnoreFailureHandler<T> {
    /// Create a new ignore failure handler
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T> Default for IgnoreFailureHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FailureHandler<T> for IgnoreFailureHandler<T> {
    fn on_batch_failure(&self, _processor: &str, _error: &BatchError, _batch: &[T]) {}

    fn on_publish_failure(&self, _processor: &str, _error: &BatchError) {}
}

/// Closure-based failure handler
///
/// # Type Parameters
/// * `T` - The item type
/// * `B` - The closure type for batch failures
/// * `P` - The closure type for publish failures
pub struct ClosureFailureHandler<T, B, P>
where
    B: Fn(&str, &BatchError, &[T]) + Send + Sync,
    P: Fn(&str, &BatchError) + Send + Sync,
{
    batch_handler: B,
    publish_handler: P,
    _phantom: PhantomData<fn(&T)>,
}

impl<T, B, P> ClosureFailureHandler<T, B, P>
where
    B: Fn(&str, &BatchError, &[T]) + Send + Sync,
    P: Fn(&str, &BatchError) + Send + Sync,
{
    /// Create a new closure-based failure handler
    ///
    /// # Arguments
    /// * `batch_handler` - Closure for dropped batches
    /// * `publish_handler` - Closure for rejected publishes
    pub fn new(batch_handler: B, publish_handler: P) -> Self {
        Self {
            batch_handler,
            publish_handler,
            _phantom: PhantomData,
        }
    }
}

impl<T, B, P> FailureHandler<T> for ClosureFailureHandler<T, B, P>
where
    B: Fn(&str, &BatchError, &[T]) + Send + Sync,
    P: Fn(&str, &BatchError) + Send + Sync,
{
    fn on_batch_failure(&self, processor: &str, error: &BatchError, batch: &[T]) {
        (self.batch_handler)(processor, error, batch);
    }

    fn on_publish_failure(&self, processor: &str, error: &BatchError) {
        (self.publish_handler)(processor, error);
    }
}
