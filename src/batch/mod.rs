//! Periodic Batch Implementation
//!
//! This module provides the periodic batch processor: items published one at a
//! time are buffered and handed to a [`BatchHandler`] in bounded-size batches,
//! triggered by accumulated count or by elapsed idle time, whichever comes first.

pub mod failure_handler;
pub mod flush_controller;
pub mod flush_lock;
pub mod handler;
pub mod metrics;
pub mod options;
pub mod processor;
pub mod producer;
pub mod queue;
pub mod retry;


pub use failure_handler::{
    ClosureFailureHandler, FailureHandler, IgnoreFailureHandler, LoggingFailureHandler,
};
pub use flush_controller::{FlushController, FlushOutcome, FlushTrigger};
pub use flush_lock::{FlushGuard, FlushLock};
pub use handler::{BatchHandler, ClosureBatchHandler};
pub use metrics::{BatchMetrics, MetricsSnapshot};
pub use options::{BatchOptions, BatchOptionsBuilder};
pub use processor::{PeriodicBatch, PeriodicBatchBuilder, ProcessorState};
pub use producer::BatchProducer;
pub use queue::InternalQueue;
pub use retry::RetryPolicy;

/// Default number of items per batch
pub const DEFAULT_BATCH_SIZE: usize = 300;

/// Default idle period between timer-driven flush attempts, in milliseconds
pub const DEFAULT_PERIOD_MS: u64 = 3_000;

/// Default number of retries after a failed handler invocation
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Errors that can occur in the periodic batch processor
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Batch size must be positive, got: {0}")]
    InvalidBatchSize(usize),

    #[error("Period must be non-zero")]
    InvalidPeriod,

    #[error("Ingestion channel is closed")]
    ChannelClosed,

    #[error("Processor has already been started")]
    AlreadyStarted,

    #[error("No tokio runtime available to spawn background tasks")]
    NoRuntime,

    #[error("Timeout waiting for processor shutdown")]
    ShutdownTimeout,

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Batch handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
