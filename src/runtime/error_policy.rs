//! # Error Policy
//!
//! Decides when a Challenge whose reconciliation failed is retried.
//!
//! - Transient errors (API failures, exhausted conflict retries) back off
//!   per challenge with a Fibonacci sequence.
//! - Configuration errors will not fix themselves until someone edits the
//!   Challenge or the cluster, so they are logged at error level and retried
//!   on a fixed, slow interval.

use crate::controller::reconciler::{challenge_key, BackoffState, Reconciler, ReconcilerError};
use crate::crd::Challenge;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors
pub fn handle_reconciliation_error<S>(
    challenge: Arc<Challenge>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<S>>,
) -> Action {
    let name = challenge.name_any();
    let namespace = challenge.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "challenge.reconciliation_error",
        challenge.name = name.as_str(),
        challenge.namespace = namespace.as_str(),
        error.class = error.class(),
        error = %error
    );
    let _error_guard = error_span.enter();

    metrics::increment_reconciliation_errors(error.class());

    if !error.is_transient() {
        let delay = ctx.config.configuration_error_requeue_duration();
        error!(
            "Challenge {}/{} cannot be solved as configured: {}",
            namespace, name, error
        );
        info!("Checking the configuration again in {}s", delay.as_secs());
        metrics::increment_requeues_total("configuration-error");
        return Action::requeue(delay);
    }

    // Backoff state is tracked per challenge to avoid cross-challenge interference
    let key = challenge_key(&challenge);
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(key).or_insert_with(|| {
                BackoffState::new(ctx.config.backoff_min_secs, ctx.config.backoff_max_secs)
            });
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (ctx.config.backoff_min_secs.max(1), 0)
        }
    };

    warn!(
        "Reconciliation of {}/{} failed: {} (error count: {}), retrying in {}s",
        namespace, name, error, error_count, backoff_seconds
    );

    metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::solver::SolverError;
    use crate::store::{MemoryStore, StoreError};

    fn challenge() -> Arc<Challenge> {
        Arc::new(
            serde_json::from_value(serde_json::json!({
                "apiVersion": "acme.cert-manager.io/v1",
                "kind": "Challenge",
                "metadata": {"name": "c1", "namespace": "default"},
                "spec": {
                    "type": "HTTP-01",
                    "dnsName": "example.com",
                    "token": "tok1",
                    "key": "tok1.thumb",
                    "solver": {"http01": {"ingress": {}}}
                }
            }))
            .unwrap(),
        )
    }

    fn transient() -> ReconcilerError {
        ReconcilerError::Solver(SolverError::Transient(StoreError::Conflict {
            kind: "Ingress".to_string(),
            namespace: "default".to_string(),
            name: "web".to_string(),
        }))
    }

    #[test]
    fn test_transient_errors_back_off_per_challenge() {
        let ctx = Arc::new(Reconciler::new(MemoryStore::new(), ControllerConfig::default()));

        let delays: Vec<Action> = (0..4)
            .map(|_| handle_reconciliation_error(challenge(), &transient(), ctx.clone()))
            .collect();
        assert_eq!(
            delays,
            vec![
                Action::requeue(Duration::from_secs(5)),
                Action::requeue(Duration::from_secs(5)),
                Action::requeue(Duration::from_secs(10)),
                Action::requeue(Duration::from_secs(15)),
            ]
        );

        let states = ctx.backoff_states.lock().unwrap();
        assert_eq!(states.get("default/c1").map(|s| s.error_count), Some(4));
    }

    #[test]
    fn test_configuration_errors_use_fixed_interval() {
        let ctx = Arc::new(Reconciler::new(MemoryStore::new(), ControllerConfig::default()));
        let error = ReconcilerError::Solver(SolverError::Configuration(
            "multiple default IngressClasses".to_string(),
        ));

        for _ in 0..3 {
            assert_eq!(
                handle_reconciliation_error(challenge(), &error, ctx.clone()),
                Action::requeue(Duration::from_secs(300))
            );
        }
        assert!(ctx.backoff_states.lock().unwrap().is_empty());
    }
}
