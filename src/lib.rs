//! `PeriodicBatch` - Size- and Time-Triggered Batch Processing
//!
//! A long-lived background processor that accepts a continuous stream of
//! individually published items and delivers them to a downstream handler in
//! bounded-size batches, triggered by accumulated count or by elapsed idle
//! time, whichever comes first.
//!
//! ## Features
//!
//! - **Non-blocking producers**: Publishing goes through an unbounded channel
//! - **Dual trigger**: Flush on `batch_size` items or after `period` of idle time
//! - **Mutual exclusion**: At most one flush runs per processor, contention is a silent skip
//! - **Ordered delivery**: Batches reach the handler in publish order
//! - **Retry with backoff**: Failed batches are retried with exponential backoff
//! - **Graceful shutdown**: Buffered items are drained and flushed on stop
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use periodic_batch::{BatchHandler, BatchOptions, PeriodicBatch};
//! use std::time::Duration;
//!
//! // Define your bulk sink
//! struct BulkInsert;
//!
//! #[async_trait]
//! impl BatchHandler<String> for BulkInsert {
//!     async fn handle_batch(&self, rows: &[String]) -> anyhow::Result<()> {
//!         println!("inserting {} rows", rows.len());
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> periodic_batch::Result<()> {
//! // Configure and start the processor
//! let options = BatchOptions::builder()
//!     .with_batch_size(300)
//!     .with_period(Duration::from_secs(3))
//!     .with_retry_count(3)
//!     .build()?;
//! let mut processor = PeriodicBatch::new(options, BulkInsert)?;
//! processor.start()?;
//!
//! // Publish from anywhere
//! let producer = processor.producer();
//! producer.publish("row-1".to_string());
//!
//! // Shutdown flushes what is left
//! processor.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **`BatchProducer`**: Cloneable publishing handle over the ingestion channel
//! - **Drain loop**: Moves items from the channel into the `InternalQueue`
//! - **Timer**: Flushes after `period` without a flush attempt
//! - **`FlushController`**: Owns the `FlushLock` and chunks the queue into batches
//! - **`RetryPolicy`**: Exponential backoff around each handler invocation
//! - **`BatchHandler`**: The user-supplied bulk sink
//! - **`FailureHandler`**: Where dropped batches and rejected publishes are reported

pub mod batch;
pub mod logging;

// Re-export the main types for convenience
pub use batch::{
    // Options
    BatchOptions,
    BatchOptionsBuilder,

    // Core types
    PeriodicBatch,
    PeriodicBatchBuilder,
    ProcessorState,
    BatchProducer,

    // Handlers
    BatchHandler,
    ClosureBatchHandler,
    FailureHandler,
    LoggingFailureHandler,
    IgnoreFailureHandler,
    ClosureFailureHandler,

    // Flushing
    FlushController,
    FlushOutcome,
    FlushTrigger,
    FlushLock,
    InternalQueue,
    RetryPolicy,

    // Observability
    BatchMetrics,
    MetricsSnapshot,

    // Error types
    BatchError,
    Result,

    // Constants
    DEFAULT_BATCH_SIZE,
    DEFAULT_PERIOD_MS,
    DEFAULT_RETRY_COUNT,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the version of the `PeriodicBatch` library
#[must_use]
pub fn version() -> &'static str {
    VERSION
}
