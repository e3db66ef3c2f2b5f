//! Flush Controller
//!
//! Owns the internal queue and the flush lock. Every flush trigger (the size
//! check after each drained item, the periodic timer, a manual flush, the
//! final flush on shutdown) converges on this controller, which guarantees
//! that at most one flush runs at a time and that items leave the queue in
//! publish order, in batches of at most `batch_size`.

use crate::batch::{
    failure_handler::FailureHandler, flush_lock::FlushLock, handler::BatchHandler,
    metrics::BatchMetrics, options::BatchOptions, queue::InternalQueue, retry::RetryPolicy,
    BatchError,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// What caused a flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The queue reached the batch size
    Size,
    /// The period elapsed without a flush
    Timer,
    /// Requested through `PeriodicBatch::flush_now`
    Manual,
    /// Final flush while shutting down
    Shutdown,
}

/// Result of a flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush held the lock; nothing was done
    Skipped,
    /// The lock was taken and the queue drained down to less than one batch
    Completed {
        /// Batches handed to the handler, failed ones included
        batches: usize,
        /// Items contained in those batches
        items: usize,
    },
}

impl FlushOutcome {
    /// Number of batches dispatched by this attempt
    pub fn batches(&self) -> usize {
        match self {
            FlushOutcome::Skipped => 0,
            FlushOutcome::Completed { batches, .. } => *batches,
        }
    }
}

/// Coordinates flushes of the internal queue into the batch handler
pub struct FlushController<T> {
    name: Arc<str>,
    batch_size: usize,
    retry: RetryPolicy,
    queue: InternalQueue<T>,
    lock: FlushLock,
    handler: Arc<dyn BatchHandler<T>>,
    failure_handler: Arc<dyn FailureHandler<T>>,
    metrics: Arc<BatchMetrics>,
    /// Time of the last flush attempt that took the lock
    last_attempt: watch::Sender<Instant>,
}

impl<T> FlushController<T> {
    /// Create a controller with an empty queue
    pub fn new(
        name: Arc<str>,
        options: &BatchOptions,
        handler: Arc<dyn BatchHandler<T>>,
        failure_handler: Arc<dyn FailureHandler<T>>,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        let (last_attempt, _) = watch::channel(Instant::now());
        Self {
            name,
            batch_size: options.batch_size,
            retry: options.retry_policy().unwrap_or_else(RetryPolicy::none),
            queue: InternalQueue::new(),
            lock: FlushLock::new(),
            handler,
            failure_handler,
            metrics,
            last_attempt,
        }
    }

    /// Name of the owning processor
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of items per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The buffer of items waiting to be flushed
    pub fn queue(&self) -> &InternalQueue<T> {
        &self.queue
    }

    /// Whether a flush is currently running
    pub fn is_flushing(&self) -> bool {
        self.lock.is_held()
    }

    /// Subscribe to the time of every flush attempt that took the lock
    pub fn subscribe_attempts(&self) -> watch::Receiver<Instant> {
        self.last_attempt.subscribe()
    }

    /// Append an item to the queue
    ///
    /// Returns true when the queue now holds at least one full batch.
    pub fn enqueue(&self, item: T) -> bool {
        self.queue.push(item) >= self.batch_size
    }
}

impl<T> FlushController<T>
where
    T: Send + Sync + 'static,
{
    /// Try to flush; skip immediately if another flush is running
    ///
    /// Dispatches one batch, then keeps dispatching while at least one full
    /// batch remains, so a single attempt can work through a large backlog.
    /// A size-triggered attempt that finds less than one full batch (because
    /// another flush got there first) dispatches nothing.
    ///
    /// The flush runs on its own task holding the lock. Dropping the returned
    /// future does not cancel it, so the lock stays held until every batch of
    /// the round has an outcome.
    pub async fn attempt_flush(self: &Arc<Self>, trigger: FlushTrigger) -> FlushOutcome {
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run_attempt(trigger).await });
        self.join_flush(task).await
    }

    /// Wait for any running flush, then dispatch everything left in the queue
    ///
    /// Unlike [`attempt_flush`](Self::attempt_flush) this also dispatches a
    /// trailing partial batch after the full ones. Runs on its own task like
    /// `attempt_flush`.
    pub async fn flush_remaining(self: &Arc<Self>) -> FlushOutcome {
        let controller = Arc::clone(self);
        let task = tokio::spawn(async move { controller.run_remaining().await });
        self.join_flush(task).await
    }

    async fn join_flush(&self, task: JoinHandle<FlushOutcome>) -> FlushOutcome {
        match task.await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(processor = %self.name, error = %error, "Flush task failed");
                FlushOutcome::Completed {
                    batches: 0,
                    items: 0,
                }
            }
        }
    }

    async fn run_attempt(self: &Arc<Self>, trigger: FlushTrigger) -> FlushOutcome {
        let Some(_guard) = self.lock.try_acquire() else {
            self.metrics.record_skipped();
            tracing::trace!(processor = %self.name, ?trigger, "Flush already in progress, skipping");
            return FlushOutcome::Skipped;
        };

        let outcome = if trigger == FlushTrigger::Size && self.queue.len() < self.batch_size {
            FlushOutcome::Completed {
                batches: 0,
                items: 0,
            }
        } else {
            self.flush_rounds(trigger).await
        };

        self.last_attempt.send_replace(Instant::now());
        outcome
    }

    async fn run_remaining(self: &Arc<Self>) -> FlushOutcome {
        let _guard = self.lock.acquire().await;

        let mut batches = 0;
        let mut items = 0;
        loop {
            let chunk = self.queue.take_chunk(self.batch_size);
            if chunk.is_empty() {
                break;
            }
            batches += 1;
            items += chunk.len();
            self.dispatch(chunk).await;
        }

        if batches > 0 {
            self.metrics.record_flush_completed();
            tracing::debug!(processor = %self.name, batches, items, "Flushed remaining items");
        }
        self.last_attempt.send_replace(Instant::now());
        FlushOutcome::Completed { batches, items }
    }

    async fn flush_rounds(self: &Arc<Self>, trigger: FlushTrigger) -> FlushOutcome {
        let mut batches = 0;
        let mut items = 0;
        loop {
            let chunk = self.queue.take_chunk(self.batch_size);
            if !chunk.is_empty() {
                batches += 1;
                items += chunk.len();
                self.dispatch(chunk).await;
            }
            if self.queue.len() < self.batch_size {
                break;
            }
        }

        if batches > 0 {
            self.metrics.record_flush_completed();
            tracing::debug!(
                processor = %self.name,
                ?trigger,
                batches,
                items,
                remaining = self.queue.len(),
                "Flush round completed"
            );
        }
        FlushOutcome::Completed { batches, items }
    }

    /// Hand one batch to the handler and wait for the final outcome
    async fn dispatch(self: &Arc<Self>, chunk: Vec<T>) {
        let batch: Arc<[T]> = chunk.into();

        match self.invoke_handler(&batch).await {
            Ok(()) => self.metrics.record_dispatched(batch.len()),
            Err(error) => {
                let error = BatchError::Handler(error);
                self.metrics.record_failed(batch.len());
                self.failure_handler
                    .on_batch_failure(&self.name, &error, &batch);
            }
        }
    }

    /// Run the handler under the retry policy
    ///
    /// Every attempt runs on its own task, so a panic inside the handler is
    /// caught at the join point and counts as one failed attempt.
    async fn invoke_handler(self: &Arc<Self>, batch: &Arc<[T]>) -> anyhow::Result<()> {
        self.retry
            .execute(|attempt| {
                self.metrics.record_attempt();
                tracing::trace!(processor = %self.name, attempt, batch_len = batch.len(), "Invoking batch handler");

                let controller = Arc::clone(self);
                let batch = Arc::clone(batch);
                async move {
                    let task =
                        tokio::spawn(async move { controller.handler.handle_batch(&batch).await });
                    match task.await {
                        Ok(result) => result,
                        Err(join_error) => Err(anyhow::anyhow!(
                            "batch handler task failed: {join_error}"
                        )),
                    }
                }
            })
            .await
    }
}

impl<T> fmt::Debug for FlushController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushController")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .field("queue", &self.queue)
            .field("flushing", &self.lock.is_held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{
        failure_handler::{ClosureFailureHandler, LoggingFailureHandler},
        handler::ClosureBatchHandler,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Batches = Arc<Mutex<Vec<Vec<u32>>>>;

    fn recording_controller(options: BatchOptions) -> (Arc<FlushController<u32>>, Batches) {
        let batches: Batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let handler = ClosureBatchHandler::new(move |items: Vec<u32>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(items);
                Ok(())
            }
        });

        let controller = FlushController::new(
            Arc::from("test"),
            &options,
            Arc::new(handler),
            Arc::new(LoggingFailureHandler::new()),
            Arc::new(BatchMetrics::new()),
        );
        (Arc::new(controller), batches)
    }

    fn options(batch_size: usize) -> BatchOptions {
        BatchOptions::builder()
            .with_batch_size(batch_size)
            .without_retry()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_flush_leaves_less_than_one_batch() {
        let (controller, batches) = recording_controller(options(2));
        for i in 0..5 {
            controller.enqueue(i);
        }

        let outcome = controller.attempt_flush(FlushTrigger::Size).await;

        assert_eq!(outcome, FlushOutcome::Completed { batches: 2, items: 4 });
        assert_eq!(*batches.lock(), vec![vec![0, 1], vec![2, 3]]);
        assert_eq!(controller.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_timer_flush_dispatches_partial_batch() {
        let (controller, batches) = recording_controller(options(10));
        for i in 0..3 {
            assert!(!controller.enqueue(i));
        }

        let outcome = controller.attempt_flush(FlushTrigger::Timer).await;

        assert_eq!(outcome, FlushOutcome::Completed { batches: 1, items: 3 });
        assert_eq!(*batches.lock(), vec![vec![0, 1, 2]]);
        assert!(controller.queue().is_empty());
    }

    #[tokio::test]
    async fn test_stale_size_trigger_dispatches_nothing() {
        let (controller, batches) = recording_controller(options(4));
        controller.enqueue(1);

        let outcome = controller.attempt_flush(FlushTrigger::Size).await;

        assert_eq!(outcome.batches(), 0);
        assert!(batches.lock().is_empty());
        assert_eq!(controller.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_is_skipped_while_lock_held() {
        let (controller, batches) = recording_controller(options(1));
        controller.enqueue(7);

        let guard = controller.lock.try_acquire().unwrap();
        assert_eq!(
            controller.attempt_flush(FlushTrigger::Timer).await,
            FlushOutcome::Skipped
        );
        drop(guard);

        assert!(batches.lock().is_empty());
        assert_eq!(controller.metrics.snapshot().flushes_skipped, 1);
        assert_eq!(controller.attempt_flush(FlushTrigger::Timer).await.batches(), 1);
    }

    #[tokio::test]
    async fn test_flush_remaining_includes_partial_batch() {
        let (controller, batches) = recording_controller(options(3));
        for i in 0..7 {
            controller.enqueue(i);
        }

        let outcome = controller.flush_remaining().await;

        assert_eq!(outcome, FlushOutcome::Completed { batches: 3, items: 7 });
        assert_eq!(
            *batches.lock(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped_and_reported() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let failure_handler = {
            let dropped = Arc::clone(&dropped);
            ClosureFailureHandler::new(
                move |_: &str, _: &BatchError, batch: &[u32]| dropped.lock().push(batch.to_vec()),
                |_: &str, _: &BatchError| {},
            )
        };
        let handler = ClosureBatchHandler::new(|_items: Vec<u32>| async {
            anyhow::bail!("sink unavailable")
        });
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            Arc::from("test"),
            &options(2),
            Arc::new(handler),
            Arc::new(failure_handler),
            Arc::clone(&metrics),
        ));
        controller.enqueue(1);
        controller.enqueue(2);

        controller.attempt_flush(FlushTrigger::Size).await;

        assert_eq!(*dropped.lock(), vec![vec![1, 2]]);
        assert!(controller.queue().is_empty());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.items_dropped, 2);
        assert_eq!(snapshot.handler_attempts, 1);
    }

    #[tokio::test]
    async fn test_handler_panic_releases_lock() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            ClosureBatchHandler::new(move |_items: Vec<u32>| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        panic!("handler bug");
                    }
                    Ok(())
                }
            })
        };
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            Arc::from("test"),
            &options(1),
            Arc::new(handler),
            Arc::new(LoggingFailureHandler::new()),
            Arc::clone(&metrics),
        ));

        controller.enqueue(1);
        controller.attempt_flush(FlushTrigger::Timer).await;
        assert!(!controller.is_flushing());

        controller.enqueue(2);
        controller.attempt_flush(FlushTrigger::Timer).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.batches_dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_counts_as_failed_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            ClosureBatchHandler::new(move |_items: Vec<u32>| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        panic!("handler bug on call {call}");
                    }
                    Ok(())
                }
            })
        };
        let options = BatchOptions::builder()
            .with_batch_size(1)
            .with_retry_count(3)
            .with_retry_backoff(Duration::from_millis(5), Duration::from_millis(10))
            .build()
            .unwrap();
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            Arc::from("test"),
            &options,
            Arc::new(handler),
            Arc::new(LoggingFailureHandler::new()),
            Arc::clone(&metrics),
        ));
        controller.enqueue(1);

        let outcome = controller.attempt_flush(FlushTrigger::Size).await;

        assert_eq!(outcome, FlushOutcome::Completed { batches: 1, items: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handler_attempts, 3);
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.batches_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_attempt_keeps_lock_until_batch_done() {
        let handler = ClosureBatchHandler::new(|_items: Vec<u32>| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        });
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            Arc::from("test"),
            &options(10),
            Arc::new(handler),
            Arc::new(LoggingFailureHandler::new()),
            Arc::clone(&metrics),
        ));
        controller.enqueue(1);

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            controller.attempt_flush(FlushTrigger::Manual),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(controller.is_flushing());

        controller.enqueue(2);
        assert_eq!(
            controller.attempt_flush(FlushTrigger::Manual).await,
            FlushOutcome::Skipped
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!controller.is_flushing());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.items_dispatched, 1);
        assert_eq!(controller.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reinvokes_same_batch() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = Arc::clone(&seen);
            ClosureBatchHandler::new(move |items: Vec<u32>| {
                let seen = Arc::clone(&seen);
                async move {
                    let mut seen = seen.lock();
                    seen.push(items);
                    anyhow::ensure!(seen.len() >= 3, "transient failure");
                    Ok(())
                }
            })
        };
        let options = BatchOptions::builder()
            .with_batch_size(2)
            .with_retry_count(3)
            .with_retry_backoff(Duration::from_millis(5), Duration::from_millis(10))
            .build()
            .unwrap();
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            Arc::from("test"),
            &options,
            Arc::new(handler),
            Arc::new(LoggingFailureHandler::new()),
            Arc::clone(&metrics),
        ));
        controller.enqueue(4);
        controller.enqueue(5);

        controller.attempt_flush(FlushTrigger::Size).await;

        assert_eq!(*seen.lock(), vec![vec![4, 5]; 3]);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.handler_attempts, 3);
        assert_eq!(snapshot.batches_dispatched, 1);
        assert_eq!(snapshot.batches_failed, 0);
    }

    #[tokio::test]
    async fn test_attempt_publishes_timestamp() {
        let (controller, _batches) = recording_controller(options(2));
        let mut attempts = controller.subscribe_attempts();

        controller.attempt_flush(FlushTrigger::Manual).await;

        assert!(attempts.has_changed().unwrap());
        attempts.borrow_and_update();
        assert!(!attempts.has_changed().unwrap());
    }
}
