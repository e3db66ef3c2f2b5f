//! PeriodicBatch demo
//!
//! Publishes a stream of synthetic events from several producer tasks into a
//! periodic batch processor whose handler logs every batch, then shuts down
//! and prints the processor metrics as JSON.

use async_trait::async_trait;
use clap::Parser;
use periodic_batch::{logging, BatchHandler, BatchOptions, PeriodicBatch};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "periodic-batch")]
#[command(about = "Demo of size- and time-triggered batch processing")]
#[command(version)]
pub struct Args {
    /// JSON file with batch options (flags below override it)
    #[arg(short, long, env = "PERIODIC_BATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Maximum number of items per batch
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Idle period before a timer flush, in milliseconds
    #[arg(short, long)]
    pub period_ms: Option<u64>,

    /// Disable retries of failed batches
    #[arg(long)]
    pub no_retry: bool,

    /// Number of retries of a failed batch
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Number of events to publish per producer
    #[arg(short, long, default_value = "1000")]
    pub events: u64,

    /// Number of concurrent producer tasks
    #[arg(long, default_value = "4")]
    pub producers: u64,

    /// Pause between two publishes of one producer, in microseconds
    #[arg(long, default_value = "100")]
    pub publish_interval_us: u64,

    /// Fail every n-th handler invocation (0 disables failure injection)
    #[arg(long, default_value = "0")]
    pub fail_every: u64,

    /// Log level used when PERIODIC_BATCH_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    fn batch_options(&self) -> periodic_batch::Result<BatchOptions> {
        let base = match &self.config {
            Some(path) => BatchOptions::from_json_file(path)?,
            None => BatchOptions::default(),
        };

        let mut builder = BatchOptions::builder()
            .with_batch_size(self.batch_size.unwrap_or(base.batch_size))
            .with_period(self.period_ms.map_or(base.period, Duration::from_millis))
            .with_retry_count(self.retry_count.unwrap_or(base.retry_count))
            .with_retry_backoff(base.retry_base_delay, base.retry_backoff_unit)
            .with_flush_on_shutdown(base.flush_on_shutdown)
            .with_name(base.name.unwrap_or_else(|| "demo-events".to_string()));
        if self.no_retry || !base.retry {
            builder = builder.without_retry();
        }
        builder.build()
    }
}

/// Synthetic event published by the demo producers
#[derive(Debug)]
struct DemoEvent {
    producer: u64,
    sequence: u64,
}

/// Handler that logs each batch and optionally fails on purpose
struct LoggingSink {
    invocations: AtomicU64,
    fail_every: u64,
}

#[async_trait]
impl BatchHandler<DemoEvent> for LoggingSink {
    async fn handle_batch(&self, items: &[DemoEvent]) -> anyhow::Result<()> {
        let invocation = self.invocations.fetch_add(1, Ordering::Relaxed) + 1;
        if self.fail_every > 0 && invocation % self.fail_every == 0 {
            anyhow::bail!("injected failure on invocation {invocation}");
        }

        let first = items.first().map(|e| (e.producer, e.sequence));
        let last = items.last().map(|e| (e.producer, e.sequence));
        info!(invocation, batch_len = items.len(), ?first, ?last, "Handled batch");
        Ok(())
    }

    fn name(&self) -> &str {
        "LoggingSink"
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    if let Err(e) = run(args).await {
        error!("Demo failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let options = args.batch_options()?;
    info!("Configuration: {options:?}");

    let sink = LoggingSink {
        invocations: AtomicU64::new(0),
        fail_every: args.fail_every,
    };
    let mut processor = PeriodicBatch::new(options, sink)?;
    processor.start()?;

    let interval = Duration::from_micros(args.publish_interval_us);
    let publishers: Vec<_> = (0..args.producers)
        .map(|producer_id| {
            let producer = processor.producer();
            let events = args.events;
            tokio::spawn(async move {
                for sequence in 0..events {
                    producer.publish(DemoEvent {
                        producer: producer_id,
                        sequence,
                    });
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }
            })
        })
        .collect();

    for publisher in publishers {
        publisher.await?;
    }

    info!("All events published, shutting down");
    processor.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&processor.metrics())?);
    Ok(())
}
