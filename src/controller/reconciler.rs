//! # Reconciler
//!
//! Reconciles one `Challenge` per call by handing it to the [`Solver`] and
//! turning the outcome into a requeue decision:
//!
//! - pending solvers are polled again after `PENDING_REQUEUE_SECS`
//! - ready solvers are resynced after `READY_RESYNC_SECS` so drift is repaired
//! - cleaned up and ignored challenges wait for the next change
//!
//! Errors are returned to the error policy, which owns backoff.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::crd::Challenge;
use crate::observability::metrics;
use crate::solver::{Readiness, Solver, SolverError, SolverSettings, SyncOutcome};
use crate::store::ClusterStore;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Reconciliation failed: {0}")]
    Solver(#[from] SolverError),
}

impl ReconcilerError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcilerError::Solver(e) => e.is_transient(),
        }
    }

    /// Error class used as a metric label
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            ReconcilerError::Solver(e) => e.class(),
        }
    }
}

/// Backoff state for a specific challenge
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_seconds, max_seconds),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconciliation context
pub struct Reconciler<S> {
    pub solver: Solver<S>,
    pub config: ControllerConfig,
    // Backoff state per challenge (identified by namespace/name)
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl<S> std::fmt::Debug for Reconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: ClusterStore> Reconciler<S> {
    pub fn new(store: S, config: ControllerConfig) -> Self {
        let settings = SolverSettings::from(&config);
        Self {
            solver: Solver::new(store, settings),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the error history of a challenge after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                states.remove(key);
            }
            Err(e) => warn!("Failed to lock backoff_states: {}", e),
        }
    }

    /// Drop the error history of challenges that are gone or resolved.
    /// Deleted challenges are never reconciled again, so nothing else
    /// would remove their entry.
    pub async fn prune_backoff_states(&self) -> Result<usize, SolverError> {
        let namespace = self.config.watch_namespace.as_deref();
        let wanted: HashSet<String> = self
            .solver
            .store()
            .list::<Challenge>(namespace, None)
            .await?
            .iter()
            .filter(|c| !c.is_resolved())
            .map(challenge_key)
            .collect();

        match self.backoff_states.lock() {
            Ok(mut states) => {
                let before = states.len();
                states.retain(|key, _| wanted.contains(key));
                Ok(before - states.len())
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}", e);
                Ok(0)
            }
        }
    }
}

/// `namespace/name` key used for per-challenge state
#[must_use]
pub fn challenge_key(challenge: &Challenge) -> String {
    format!(
        "{}/{}",
        challenge.namespace().unwrap_or_default(),
        challenge.name_any()
    )
}

/// Reconcile one Challenge
pub async fn reconcile<S: ClusterStore>(
    challenge: Arc<Challenge>,
    ctx: Arc<Reconciler<S>>,
) -> Result<Action, ReconcilerError> {
    let span = tracing::info_span!(
        "challenge.reconcile",
        challenge.namespace = challenge.namespace().unwrap_or_default().as_str(),
        challenge.name = challenge.name_any().as_str(),
        challenge.domain = challenge.spec.dns_name.as_str(),
    );
    reconcile_inner(challenge, ctx).instrument(span).await
}

async fn reconcile_inner<S: ClusterStore>(
    challenge: Arc<Challenge>,
    ctx: Arc<Reconciler<S>>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();

    let result = ctx.solver.sync(&challenge).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    let outcome = result?;
    ctx.reset_backoff(&challenge_key(&challenge));

    let action = match outcome {
        SyncOutcome::Ignored => {
            debug!("Not an HTTP-01 challenge, ignoring");
            Action::await_change()
        }
        SyncOutcome::CleanedUp(report) => {
            if report.is_empty() {
                debug!("Challenge resolved, nothing left to clean up");
            } else {
                info!("Challenge resolved, cleaned up solver resources: {:?}", report);
            }
            Action::await_change()
        }
        SyncOutcome::Solving(Readiness::Ready) => {
            debug!(
                "Solver ready, resyncing in {}s",
                ctx.config.ready_resync_secs
            );
            metrics::increment_requeues_total("ready-resync");
            Action::requeue(ctx.config.ready_resync_duration())
        }
        SyncOutcome::Solving(Readiness::Pending(reason)) => {
            info!(
                "Solver pending ({}), checking again in {}s",
                reason, ctx.config.pending_requeue_secs
            );
            metrics::increment_requeues_total("pending");
            Action::requeue(ctx.config.pending_requeue_duration())
        }
    };

    Ok(action)
}
