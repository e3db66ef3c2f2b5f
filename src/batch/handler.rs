//! Batch Handler
//!
//! The downstream sink of a periodic batch processor. Users implement
//! [`BatchHandler`] for their bulk operation (a bulk insert, a bulk API call)
//! or wrap an async closure in a [`ClosureBatchHandler`].

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

/// Consumer of batches produced by the processor
///
/// A handler receives each batch as a slice, in publish order. Returning an
/// error marks the batch as failed; depending on the processor options the
/// same slice is then handed over again or the batch is dropped.
///
/// Batches are dispatched one at a time, but the handler is shared across
/// tasks and must therefore be `Send + Sync`.
///
/// # Type Parameters
/// * `T` - The item type being batched
///
/// # Examples
/// ```
/// use async_trait::async_trait;
/// use periodic_batch::BatchHandler;
///
/// struct AuditSink;
///
/// #[async_trait]
/// impl BatchHandler<String> for AuditSink {
///     async fn handle_batch(&self, items: &[String]) -> anyhow::Result<()> {
///         println!("writing {} audit records", items.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BatchHandler<T>: Send + Sync {
    /// Process one batch
    async fn handle_batch(&self, items: &[T]) -> anyhow::Result<()>;

    /// Name used in log lines when the options do not provide one
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A batch handler created from an async closure
///
/// The closure receives an owned copy of each batch (hence `T: Clone`) and
/// must return a future resolving to `anyhow::Result<()>`.
pub struct ClosureBatchHandler<T, F> {
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<T, F, Fut> ClosureBatchHandler<T, F>
where
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    /// Create a new closure-based batch handler
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> BatchHandler<T> for ClosureBatchHandler<T, F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle_batch(&self, items: &[T]) -> anyhow::Result<()> {
        (self.handler)(items.to_vec()).await
    }

    fn name(&self) -> &str {
        "ClosureBatchHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct CountingHandler {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchHandler<u32> for CountingHandler {
        async fn handle_batch(&self, items: &[u32]) -> anyhow::Result<()> {
            self.seen.lock().push(items.len());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_trait_handler() {
        let handler = CountingHandler {
            seen: Mutex::new(Vec::new()),
        };

        handler.handle_batch(&[1, 2, 3]).await.unwrap();
        handler.handle_batch(&[4]).await.unwrap();

        assert_eq!(*handler.seen.lock(), vec![3, 1]);
        assert!(handler.name().ends_with("CountingHandler"));
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);

        let handler = ClosureBatchHandler::new(move |items: Vec<&'static str>| {
            let sink = Arc::clone(&sink);
            async move {
                if items.is_empty() {
                    anyhow::bail!("empty batch");
                }
                sink.lock().push(items);
                Ok(())
            }
        });

        handler.handle_batch(&["a", "b"]).await.unwrap();
        assert!(handler.handle_batch(&[]).await.is_err());

        assert_eq!(*batches.lock(), vec![vec!["a", "b"]]);
        assert_eq!(handler.name(), "ClosureBatchHandler");
    }

    #[tokio::test]
    async fn test_handler_as_trait_object() {
        let handler: Arc<dyn BatchHandler<u32>> = Arc::new(ClosureBatchHandler::new(
            |items: Vec<u32>| async move {
                anyhow::ensure!(items.iter().all(|i| *i < 10), "item out of range");
                Ok(())
            },
        ));

        assert!(handler.handle_batch(&[1, 2]).await.is_ok());
        assert!(handler.handle_batch(&[42]).await.is_err());
    }
}
