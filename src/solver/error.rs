//! # Solver Errors
//!
//! Two classes matter to callers: transient failures are retried by
//! requeueing, configuration errors need the user to fix the Challenge's
//! solver configuration (or the cluster's IngressClasses).

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SolverError {
    /// API failure, timeout, or a write lost to a concurrent writer
    #[error("transient failure: {0}")]
    Transient(#[from] StoreError),

    /// Optimistic concurrency retries on a shared object ran out
    #[error("gave up patching {kind} {namespace}/{name} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted {
        kind: String,
        namespace: String,
        name: String,
        attempts: u32,
    },

    /// The solver configuration cannot be acted on as written
    #[error("invalid HTTP-01 solver configuration: {0}")]
    Configuration(String),
}

impl SolverError {
    /// True when retrying later may succeed without user action
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, SolverError::Configuration(_))
    }

    /// Stable label for metrics and logs
    #[must_use]
    pub fn class(&self) -> &'static str {
        if self.is_transient() {
            "transient"
        } else {
            "configuration"
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        SolverError::Configuration(message.into())
    }
}
