//! Batch Options
//!
//! Immutable configuration for a periodic batch processor, with a fluent
//! builder and JSON loading. Durations are expressed in milliseconds when
//! serialized.

use crate::batch::{
    retry::RetryPolicy, BatchError, Result, DEFAULT_BATCH_SIZE, DEFAULT_PERIOD_MS,
    DEFAULT_RETRY_COUNT,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration of a periodic batch processor
///
/// Built once through [`BatchOptionsBuilder`] (or deserialized) and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Maximum number of items handed to the handler at once
    pub batch_size: usize,
    /// Idle time since the last flush attempt before the timer flushes
    #[serde(rename = "period_ms", with = "duration_ms")]
    pub period: Duration,
    /// Whether failed handler invocations are retried
    pub retry: bool,
    /// Number of retries after the first failed invocation
    pub retry_count: u32,
    /// Constant part of the retry backoff
    #[serde(rename = "retry_base_delay_ms", with = "duration_ms")]
    pub retry_base_delay: Duration,
    /// Exponential part of the retry backoff, doubled per attempt
    #[serde(rename = "retry_backoff_unit_ms", with = "duration_ms")]
    pub retry_backoff_unit: Duration,
    /// Dispatch whatever is still buffered when the processor shuts down
    pub flush_on_shutdown: bool,
    /// Name used in log lines; defaults to the handler type name
    pub name: Option<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            period: Duration::from_millis(DEFAULT_PERIOD_MS),
            retry: true,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_base_delay: RetryPolicy::DEFAULT_BASE_DELAY,
            retry_backoff_unit: RetryPolicy::DEFAULT_BACKOFF_UNIT,
            flush_on_shutdown: true,
            name: None,
        }
    }
}

impl BatchOptions {
    /// Start building options from the defaults
    pub fn builder() -> BatchOptionsBuilder {
        BatchOptionsBuilder::new()
    }

    /// Check the options for values the processor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BatchError::InvalidBatchSize(self.batch_size));
        }
        if self.period.is_zero() {
            return Err(BatchError::InvalidPeriod);
        }
        Ok(())
    }

    /// Parse and validate options from a JSON document
    ///
    /// Missing fields take their default values.
    ///
    /// # Examples
    /// ```
    /// use periodic_batch::BatchOptions;
    ///
    /// let options = BatchOptions::from_json_str(r#"{ "batch_size": 50, "period_ms": 250 }"#).unwrap();
    /// assert_eq!(options.batch_size, 50);
    /// assert!(options.retry);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// The retry policy these options describe, or `None` when retry is disabled
    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.then(|| {
            RetryPolicy::new(self.retry_count)
                .with_backoff(self.retry_base_delay, self.retry_backoff_unit)
        })
    }
}

/// Fluent builder for [`BatchOptions`]
#[derive(Debug, Clone, Default)]
pub struct BatchOptionsBuilder {
    options: BatchOptions,
}

impl BatchOptionsBuilder {
    /// Create a builder holding the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of items per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Set the idle period after which the timer flushes
    pub fn with_period(mut self, period: Duration) -> Self {
        self.options.period = period;
        self
    }

    /// Invoke the handler once per batch, without retries
    pub fn without_retry(mut self) -> Self {
        self.options.retry = false;
        self
    }

    /// Set the number of retries after a failed invocation
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.options.retry_count = retry_count;
        self
    }

    /// Override the backoff delays used between retries
    pub fn with_retry_backoff(mut self, base_delay: Duration, backoff_unit: Duration) -> Self {
        self.options.retry_base_delay = base_delay;
        self.options.retry_backoff_unit = backoff_unit;
        self
    }

    /// Choose whether buffered items are dispatched on shutdown
    pub fn with_flush_on_shutdown(mut self, flush_on_shutdown: bool) -> Self {
        self.options.flush_on_shutdown = flush_on_shutdown;
        self
    }

    /// Set the name used in log lines
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Validate and return the options
    pub fn build(self) -> Result<BatchOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
