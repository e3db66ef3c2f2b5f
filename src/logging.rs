//! Logging setup for applications embedding the processor
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_logging`] once at startup. The filter
//! is read from the `PERIODIC_BATCH_LOG` environment variable (standard
//! `EnvFilter` syntax), falling back to the given default directive.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV_VAR: &str = "PERIODIC_BATCH_LOG";

/// Build the filter from `PERIODIC_BATCH_LOG`, or `default_directive` when unset or invalid
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global fmt subscriber
///
/// Returns an error if a global subscriber has already been installed.
pub fn try_init_logging(
    default_directive: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true)
        .try_init()
}

/// Install a global fmt subscriber, ignoring an already installed one
pub fn init_logging(default_directive: &str) {
    let _ = try_init_logging(default_directive);
}
