//! # ACME HTTP-01 Solver Controller
//!
//! A Kubernetes controller that solves ACME HTTP-01 challenges in-cluster.
//!
//! ## Overview
//!
//! For every pending HTTP-01 `Challenge` the controller:
//!
//! 1. **Runs a responder** - a solver Pod serving the key authorization
//! 2. **Exposes it** - a Service selecting exactly that Pod
//! 3. **Routes the CA to it** - an Ingress path or Gateway API HTTPRoute rule for
//!    `/.well-known/acme-challenge/<token>`, either in a solver-owned object or
//!    merged into an existing one
//! 4. **Cleans up** - removes all of the above once the Challenge is resolved
//!
//! A background sweep removes solver resources whose Challenge has gone away.

use acme_http01_controller::runtime::{initialization, sweep, watch_loop};
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialization::initialize().await?;

    let sweep_handle = sweep::spawn_orphan_sweep(init.reconciler.clone());

    watch_loop::run_watch_loop(init.challenges, init.reconciler, init.server_state).await;

    sweep_handle.abort();
    info!("Shutdown complete");
    Ok(())
}
