//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::*;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Image run by solver pods
    pub solver_image: String,
    pub solver_cpu_request: String,
    pub solver_memory_request: String,
    pub solver_cpu_limit: String,
    pub solver_memory_limit: String,
    /// Attempts per shared Ingress/HTTPRoute patch before giving up
    pub conflict_retry_limit: u32,
    /// Requeue interval while a solver is not ready yet (seconds)
    pub pending_requeue_secs: u64,
    /// Resync interval for ready solvers (seconds)
    pub ready_resync_secs: u64,
    /// Requeue interval after a configuration error (seconds)
    pub configuration_error_requeue_secs: u64,
    /// Interval between orphan sweeps (seconds)
    pub orphan_sweep_interval_secs: u64,
    /// Fibonacci backoff bounds for transient errors (seconds)
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    /// Restrict the controller to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: u16,
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            solver_image: default_solver_image(),
            solver_cpu_request: DEFAULT_SOLVER_CPU_REQUEST.to_string(),
            solver_memory_request: DEFAULT_SOLVER_MEMORY_REQUEST.to_string(),
            solver_cpu_limit: DEFAULT_SOLVER_CPU_LIMIT.to_string(),
            solver_memory_limit: DEFAULT_SOLVER_MEMORY_LIMIT.to_string(),
            conflict_retry_limit: DEFAULT_CONFLICT_RETRY_LIMIT,
            pending_requeue_secs: DEFAULT_PENDING_REQUEUE_SECS,
            ready_resync_secs: DEFAULT_READY_RESYNC_SECS,
            configuration_error_requeue_secs: DEFAULT_CONFIGURATION_ERROR_REQUEUE_SECS,
            orphan_sweep_interval_secs: DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_namespace: None,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "json".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            solver_image: env_var_or_default_str(lookup("SOLVER_IMAGE"), &defaults.solver_image),
            solver_cpu_request: env_var_or_default_str(
                lookup("SOLVER_CPU_REQUEST"),
                &defaults.solver_cpu_request,
            ),
            solver_memory_request: env_var_or_default_str(
                lookup("SOLVER_MEMORY_REQUEST"),
                &defaults.solver_memory_request,
            ),
            solver_cpu_limit: env_var_or_default_str(
                lookup("SOLVER_CPU_LIMIT"),
                &defaults.solver_cpu_limit,
            ),
            solver_memory_limit: env_var_or_default_str(
                lookup("SOLVER_MEMORY_LIMIT"),
                &defaults.solver_memory_limit,
            ),
            conflict_retry_limit: env_var_or_default(
                lookup("CONFLICT_RETRY_LIMIT"),
                defaults.conflict_retry_limit,
            )
            .max(1),
            pending_requeue_secs: env_var_or_default(
                lookup("PENDING_REQUEUE_SECS"),
                defaults.pending_requeue_secs,
            ),
            ready_resync_secs: env_var_or_default(
                lookup("READY_RESYNC_SECS"),
                defaults.ready_resync_secs,
            ),
            configuration_error_requeue_secs: env_var_or_default(
                lookup("CONFIGURATION_ERROR_REQUEUE_SECS"),
                defaults.configuration_error_requeue_secs,
            ),
            orphan_sweep_interval_secs: env_var_or_default(
                lookup("ORPHAN_SWEEP_INTERVAL_SECS"),
                defaults.orphan_sweep_interval_secs,
            ),
            backoff_min_secs: env_var_or_default(
                lookup("BACKOFF_MIN_SECS"),
                defaults.backoff_min_secs,
            ),
            backoff_max_secs: env_var_or_default(
                lookup("BACKOFF_MAX_SECS"),
                defaults.backoff_max_secs,
            ),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            max_concurrent_reconciliations: env_var_or_default(
                lookup("MAX_CONCURRENT_RECONCILIATIONS"),
                defaults.max_concurrent_reconciliations,
            ),
            metrics_port: env_var_or_default(lookup("METRICS_PORT"), defaults.metrics_port),
            log_format: env_var_or_default_str(lookup("LOG_FORMAT"), &defaults.log_format),
        }
    }

    /// Get pending requeue duration
    pub fn pending_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_secs)
    }

    /// Get ready resync duration
    pub fn ready_resync_duration(&self) -> Duration {
        Duration::from_secs(self.ready_resync_secs)
    }

    /// Get configuration error requeue duration
    pub fn configuration_error_requeue_duration(&self) -> Duration {
        Duration::from_secs(self.configuration_error_requeue_secs)
    }

    /// Get orphan sweep interval
    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_sweep_interval_secs.max(1))
    }
}

/// Parse a value or fall back to the default
fn env_var_or_default<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Take a string value or fall back to the default
fn env_var_or_default_str(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
