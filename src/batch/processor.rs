//! Periodic Batch Processor
//!
//! Ties the components together: the unbounded ingestion channel, the drain
//! loop that moves items into the internal queue and fires the size trigger,
//! the idle timer, and the flush controller they both call into.
//!
//! ```text
//! BatchProducer -> channel -> drain loop -> InternalQueue -> FlushController -> BatchHandler
//!                                  |                              ^
//!                                  +------ size trigger ----------+
//!                             timer task ---- period elapsed -----+
//! ```

use crate::batch::{
    failure_handler::{FailureHandler, LoggingFailureHandler},
    flush_controller::{FlushController, FlushOutcome, FlushTrigger},
    handler::BatchHandler,
    metrics::{BatchMetrics, MetricsSnapshot},
    options::BatchOptions,
    producer::BatchProducer,
    BatchError, Result,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle state of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Constructed, background tasks not spawned yet
    Created,
    /// Running, no flush in progress
    Idle,
    /// Running, a flush holds the flush lock
    Flushing,
    /// Shut down; no further items are accepted
    Stopped,
}

/// Background tasks of a started processor
struct BackgroundTasks {
    drain: JoinHandle<()>,
    timer: JoinHandle<()>,
}

/// A long-lived processor delivering published items to a handler in batches
///
/// A batch is flushed when `batch_size` items have accumulated or when
/// `period` has elapsed since the last flush attempt, whichever comes first.
/// At most one flush runs at a time and batches are dispatched one after the
/// other in publish order.
///
/// Call [`shutdown`](Self::shutdown) before dropping a started processor.
/// Dropping it only signals the background tasks to stop: items still queued
/// are discarded (the count is logged at warn level) regardless of
/// `flush_on_shutdown`.
///
/// # Examples
///
/// ```rust
/// use periodic_batch::{BatchOptions, ClosureBatchHandler, PeriodicBatch};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> periodic_batch::Result<()> {
/// let handler = ClosureBatchHandler::new(|items: Vec<u64>| async move {
///     println!("bulk insert of {} rows", items.len());
///     Ok(())
/// });
/// let options = BatchOptions::builder()
///     .with_batch_size(100)
///     .with_period(Duration::from_millis(500))
///     .build()?;
///
/// let mut processor = PeriodicBatch::new(options, handler)?;
/// processor.start()?;
///
/// let producer = processor.producer();
/// for id in 0..250 {
///     producer.publish(id);
/// }
///
/// processor.shutdown().await?;
/// assert_eq!(processor.metrics().items_dispatched, 250);
/// # Ok(())
/// # }
/// ```
pub struct PeriodicBatch<T> {
    options: BatchOptions,
    instance_id: Uuid,
    controller: Arc<FlushController<T>>,
    failure_handler: Arc<dyn FailureHandler<T>>,
    metrics: Arc<BatchMetrics>,
    sender: mpsc::UnboundedSender<T>,
    receiver: Option<mpsc::UnboundedReceiver<T>>,
    shutdown_signal: watch::Sender<bool>,
    tasks: Option<BackgroundTasks>,
    stopped: bool,
}

impl<T> PeriodicBatch<T>
where
    T: Send + Sync + 'static,
{
    /// Create a processor logging failures through [`LoggingFailureHandler`]
    pub fn new<H>(options: BatchOptions, handler: H) -> Result<Self>
    where
        H: BatchHandler<T> + 'static,
    {
        Self::builder(handler).options(options).build()
    }

    /// Start configuring a processor for `handler`
    pub fn builder<H>(handler: H) -> PeriodicBatchBuilder<T>
    where
        H: BatchHandler<T> + 'static,
    {
        PeriodicBatchBuilder::new(Arc::new(handler))
    }

    fn from_parts(
        options: BatchOptions,
        handler: Arc<dyn BatchHandler<T>>,
        failure_handler: Arc<dyn FailureHandler<T>>,
    ) -> Result<Self> {
        options.validate()?;

        let name: Arc<str> = match &options.name {
            Some(name) => Arc::from(name.as_str()),
            None => Arc::from(handler.name()),
        };
        let metrics = Arc::new(BatchMetrics::new());
        let controller = Arc::new(FlushController::new(
            name,
            &options,
            handler,
            Arc::clone(&failure_handler),
            Arc::clone(&metrics),
        ));
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown_signal, _) = watch::channel(false);

        Ok(Self {
            options,
            instance_id: Uuid::new_v4(),
            controller,
            failure_handler,
            metrics,
            sender,
            receiver: Some(receiver),
            shutdown_signal,
            tasks: None,
            stopped: false,
        })
    }

    /// Spawn the drain loop and the timer on the current tokio runtime
    ///
    /// Items published before `start` are buffered in the channel and drained
    /// once the processor runs.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(BatchError::ChannelClosed);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| BatchError::NoRuntime)?;
        let receiver = self.receiver.take().ok_or(BatchError::AlreadyStarted)?;

        tracing::debug!(
            processor = %self.controller.name(),
            instance_id = %self.instance_id,
            batch_size = self.options.batch_size,
            period_ms = u64::try_from(self.options.period.as_millis()).unwrap_or(u64::MAX),
            retry = self.options.retry,
            retry_count = self.options.retry_count,
            "Execute periodic batch service"
        );

        let drain = runtime.spawn(drain_loop(
            Arc::clone(&self.controller),
            receiver,
            self.shutdown_signal.subscribe(),
        ));
        let timer = runtime.spawn(timer_loop(
            Arc::clone(&self.controller),
            self.options.period,
            self.shutdown_signal.subscribe(),
        ));
        self.tasks = Some(BackgroundTasks { drain, timer });

        tracing::info!(processor = %self.controller.name(), "Periodic batch processor started");
        Ok(())
    }

    /// Stop accepting items and wind the processor down
    ///
    /// Closes the ingestion channel, waits for the drain loop to move every
    /// already-published item into the queue, stops the timer, and then (when
    /// `flush_on_shutdown` is set) waits for any running flush and dispatches
    /// everything left, including a final partial batch. In-flight handler
    /// invocations and retry backoffs are never cancelled; use
    /// [`shutdown_timeout`](Self::shutdown_timeout) to bound the wait.
    pub async fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.shutdown_signal.send_replace(true);

        match self.tasks.take() {
            Some(tasks) => {
                log_join_error(self.controller.name(), "drain loop", tasks.drain.await);
                log_join_error(self.controller.name(), "timer", tasks.timer.await);
            }
            None => {
                // Never started: items still sit in the channel
                if let Some(mut receiver) = self.receiver.take() {
                    receiver.close();
                    while let Ok(item) = receiver.try_recv() {
                        self.controller.enqueue(item);
                    }
                }
            }
        }

        let remaining = self.controller.queue().len();
        if self.options.flush_on_shutdown {
            self.controller.flush_remaining().await;
        } else if remaining > 0 {
            tracing::warn!(
                processor = %self.controller.name(),
                remaining,
                "Shutting down with unflushed items, they are discarded"
            );
        }

        tracing::info!(processor = %self.controller.name(), "Periodic batch processor stopped");
        Ok(())
    }

    /// [`shutdown`](Self::shutdown) with a deadline
    ///
    /// Returns [`BatchError::ShutdownTimeout`] when the deadline passes first.
    /// The processor is stopped either way; work still in flight keeps running
    /// in the background.
    pub async fn shutdown_timeout(&mut self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.shutdown())
            .await
            .map_err(|_| BatchError::ShutdownTimeout)?
    }

    /// Create a publishing handle
    pub fn producer(&self) -> BatchProducer<T> {
        BatchProducer::new(
            self.sender.clone(),
            Arc::from(self.controller.name()),
            Arc::clone(&self.failure_handler),
            Arc::clone(&self.metrics),
        )
    }

    /// Run one flush attempt now
    ///
    /// Follows the same rules as the timer: skipped if a flush is already
    /// running, otherwise dispatches the queued items, a partial batch included.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.controller.attempt_flush(FlushTrigger::Manual).await
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessorState {
        if self.stopped {
            ProcessorState::Stopped
        } else if self.tasks.is_none() {
            ProcessorState::Created
        } else if self.controller.is_flushing() {
            ProcessorState::Flushing
        } else {
            ProcessorState::Idle
        }
    }

    /// Whether the background tasks are running
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ProcessorState::Idle | ProcessorState::Flushing)
    }

    /// Snapshot of the processor counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Items drained from the channel but not flushed yet
    pub fn pending(&self) -> usize {
        self.controller.queue().len()
    }

    /// Name used in log lines
    pub fn name(&self) -> &str {
        self.controller.name()
    }

    /// Unique id of this processor instance
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// The options the processor was built with
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }
}

impl<T> Drop for PeriodicBatch<T> {
    fn drop(&mut self) {
        if !self.stopped {
            let discarded = self.controller.queue().len();
            if discarded > 0 {
                tracing::warn!(
                    processor = %self.controller.name(),
                    discarded,
                    "Processor dropped without shutdown, queued items are discarded"
                );
            }
        }
        // Background tasks observe the signal and exit
        self.shutdown_signal.send_replace(true);
    }
}

impl<T> fmt::Debug for PeriodicBatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicBatch")
            .field("instance_id", &self.instance_id)
            .field("options", &self.options)
            .field("controller", &self.controller)
            .field("started", &self.tasks.is_some())
            .field("stopped", &self.stopped)
            .finish()
    }
}

/// Builder for [`PeriodicBatch`]
pub struct PeriodicBatchBuilder<T> {
    handler: Arc<dyn BatchHandler<T>>,
    options: BatchOptions,
    failure_handler: Option<Arc<dyn FailureHandler<T>>>,
}

impl<T> PeriodicBatchBuilder<T>
where
    T: Send + Sync + 'static,
{
    /// Create a builder for an already shared handler
    pub fn new(handler: Arc<dyn BatchHandler<T>>) -> Self {
        Self {
            handler,
            options: BatchOptions::default(),
            failure_handler: None,
        }
    }

    /// Use these options instead of the defaults
    pub fn options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Report publish and batch failures to `failure_handler`
    pub fn failure_handler<F>(mut self, failure_handler: F) -> Self
    where
        F: FailureHandler<T> + 'static,
    {
        self.failure_handler = Some(Arc::new(failure_handler));
        self
    }

    /// Build the processor; it still has to be started
    pub fn build(self) -> Result<PeriodicBatch<T>> {
        let failure_handler = self
            .failure_handler
            .unwrap_or_else(|| Arc::new(LoggingFailureHandler::new()));
        PeriodicBatch::from_parts(self.options, self.handler, failure_handler)
    }
}

/// Move items from the ingestion channel into the internal queue
///
/// Fires a size-triggered flush on its own task whenever the queue holds a
/// full batch, without waiting for it. On the shutdown signal the channel is
/// closed for writes and the loop keeps reading until it is drained.
async fn drain_loop<T>(
    controller: Arc<FlushController<T>>,
    mut receiver: mpsc::UnboundedReceiver<T>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Send + Sync + 'static,
{
    let mut closing = false;
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed(), if !closing => {
                receiver.close();
                closing = true;
            }
            item = receiver.recv() => {
                let Some(item) = item else { break };
                if controller.enqueue(item) {
                    let controller = Arc::clone(&controller);
                    tokio::spawn(async move {
                        controller.attempt_flush(FlushTrigger::Size).await;
                    });
                }
            }
        }
    }

    receiver.close();
    tracing::debug!(
        processor = %controller.name(),
        pending = controller.queue().len(),
        "Drain loop finished"
    );
}

/// Flush whenever `period` passes without a flush attempt
///
/// Re-armed after each of its own attempts and after every attempt made by
/// another trigger, so the period measures idle time rather than wall-clock
/// ticks.
async fn timer_loop<T>(
    controller: Arc<FlushController<T>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Send + Sync + 'static,
{
    let mut attempts = controller.subscribe_attempts();
    let mut deadline = Instant::now() + period;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Ok(()) = attempts.changed() => {
                deadline = *attempts.borrow_and_update() + period;
            }
            _ = tokio::time::sleep_until(deadline) => {
                controller.attempt_flush(FlushTrigger::Timer).await;
                deadline = Instant::now() + period;
            }
        }
    }
}

fn log_join_error(processor: &str, task: &str, result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        tracing::error!(processor, task, error = %error, "Periodic batch background task failed");
    }
}
