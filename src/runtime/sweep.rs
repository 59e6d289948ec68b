//! # Orphan Sweep
//!
//! Background task that periodically removes solver resources nobody will
//! clean up through the normal path: Challenges deleted without passing
//! through a resolved state, Challenges re-created under the same name with
//! a new token, and anything left behind while the controller was down.
//!
//! The first sweep runs immediately at startup.

use crate::controller::reconciler::Reconciler;
use crate::solver::{SolverError, SweepReport};
use crate::store::ClusterStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

/// Run one sweep over the watched namespace (or every namespace)
pub async fn run_sweep<S: ClusterStore>(
    ctx: &Reconciler<S>,
) -> Result<SweepReport, SolverError> {
    let namespace = ctx.config.watch_namespace.as_deref();
    let report = ctx.solver.sweep_orphans(namespace).await?;

    if report.orphans.is_empty() && report.failed.is_empty() && report.orphaned_backends.is_empty() {
        debug!(
            "Orphan sweep found {} live solver resource set(s), nothing to clean up",
            report.live
        );
    } else {
        info!(
            "Orphan sweep cleaned up {} resource set(s) and {} stray backend(s), {} failed, {} live: {:?}",
            report.orphans.len(),
            report.orphaned_backends.len(),
            report.failed.len(),
            report.live,
            report.removed
        );
    }
    if report.unattributed > 0 {
        warn!(
            "{} solver-labelled object(s) carry no challenge annotations and were left alone",
            report.unattributed
        );
    }

    let pruned = ctx.prune_backoff_states().await?;
    if pruned > 0 {
        debug!("Dropped backoff state of {} finished challenge(s)", pruned);
    }

    Ok(report)
}

/// Spawn the periodic sweep
pub fn spawn_orphan_sweep<S: ClusterStore + 'static>(ctx: Arc<Reconciler<S>>) -> JoinHandle<()> {
    let period = ctx.config.orphan_sweep_interval();
    info!("Orphan sweep running every {}s", period.as_secs());

    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = run_sweep(&ctx).await {
                    warn!("Orphan sweep failed, retrying next interval: {}", e);
                }
            }
        }
        .instrument(tracing::info_span!("orphan.sweep")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::controller::reconciler::BackoffState;
    use crate::crd::Challenge;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_sweep_of_empty_cluster_is_clean() {
        let ctx = Reconciler::new(MemoryStore::new(), ControllerConfig::default());
        let report = run_sweep(&ctx).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn test_sweep_drops_backoff_state_of_deleted_challenges() {
        let ctx = Reconciler::new(MemoryStore::new(), ControllerConfig::default());
        let pending: Challenge = serde_json::from_value(serde_json::json!({
            "apiVersion": "acme.cert-manager.io/v1",
            "kind": "Challenge",
            "metadata": {"name": "pending", "namespace": "default"},
            "spec": {
                "type": "HTTP-01",
                "dnsName": "example.com",
                "token": "tok1",
                "key": "tok1.thumb",
                "solver": {"http01": {"ingress": {"name": "missing"}}}
            }
        }))
        .unwrap();
        ctx.solver.store().create("default", &pending).await.unwrap();
        {
            let mut states = ctx.backoff_states.lock().unwrap();
            for key in ["default/pending", "default/deleted"] {
                states.insert(key.to_string(), BackoffState::new(5, 300));
            }
        }

        run_sweep(&ctx).await.unwrap();

        let states = ctx.backoff_states.lock().unwrap();
        assert!(states.contains_key("default/pending"));
        assert!(!states.contains_key("default/deleted"));
    }
}
