//! # Watch Loop
//!
//! Runs the kube-runtime `Controller` over Challenge resources. Every event
//! (create, update, status change, requeue) ends up in
//! [`reconcile`](crate::controller::reconciler::reconcile); failures go to
//! the error policy.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::Challenge;
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::server::ServerState;
use crate::store::ClusterStore;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run the controller until a shutdown signal arrives
pub async fn run_watch_loop<S: ClusterStore + 'static>(
    challenges: Api<Challenge>,
    reconciler: Arc<Reconciler<S>>,
    server_state: Arc<ServerState>,
) {
    let concurrency = reconciler.config.max_concurrent_reconciliations;
    info!(
        "Starting controller watch loop (max {} concurrent reconciliations)...",
        concurrency
    );

    Controller::new(challenges, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile::<S>, handle_reconciliation_error::<S>, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!("Reconciled {}: {:?}", object, action);
                }
                Err(controller::Error::ReconcilerFailed(e, object)) => {
                    // Already logged and counted by the error policy
                    debug!("Reconciliation of {} failed: {}", object, e);
                }
                Err(e) => {
                    warn!("Controller stream error: {}", e);
                }
            }
        })
        .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
}
