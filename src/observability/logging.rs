//! # Logging
//!
//! `tracing` subscriber setup. `RUST_LOG` takes precedence; otherwise this
//! crate logs at info. `LOG_FORMAT=json` (the default) emits one JSON object
//! per line for log collectors, anything else emits human-readable text.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "acme_http01_controller=info";

/// Install the global tracing subscriber
///
/// # Errors
///
/// Returns an error when a global subscriber is already installed.
pub fn init_tracing(log_format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if log_format.eq_ignore_ascii_case("json") {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))
    }
}
