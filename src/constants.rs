//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables (see [`crate::config::ControllerConfig`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Responder image repository; the tag defaults to the crate version
pub const DEFAULT_SOLVER_IMAGE_REPOSITORY: &str = "ghcr.io/acme-http01/acmesolver";

pub const DEFAULT_SOLVER_CPU_REQUEST: &str = "10m";
pub const DEFAULT_SOLVER_MEMORY_REQUEST: &str = "64Mi";
pub const DEFAULT_SOLVER_CPU_LIMIT: &str = "100m";
pub const DEFAULT_SOLVER_MEMORY_LIMIT: &str = "64Mi";

/// Attempts per shared Ingress/HTTPRoute patch before surfacing a transient error
pub const DEFAULT_CONFLICT_RETRY_LIMIT: u32 = 5;

/// Requeue interval while the solver is not yet ready (seconds)
pub const DEFAULT_PENDING_REQUEUE_SECS: u64 = 5;

/// Resync interval once the solver is ready, to repair drift (seconds)
pub const DEFAULT_READY_RESYNC_SECS: u64 = 60;

/// Requeue interval after a configuration error (seconds)
pub const DEFAULT_CONFIGURATION_ERROR_REQUEUE_SECS: u64 = 300;

/// Interval between orphan sweeps (seconds)
pub const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 300;

/// Fibonacci backoff bounds for transient reconciliation errors (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Upper bound on concurrently reconciled Challenges
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 16;

/// `<repository>:<crate version>`
#[must_use]
pub fn default_solver_image() -> String {
    format!(
        "{DEFAULT_SOLVER_IMAGE_REPOSITORY}:{}",
        env!("CARGO_PKG_VERSION")
    )
}
