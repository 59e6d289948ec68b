//! # HTTP-01 Solver
//!
//! Provisions and tears down the serving infrastructure for one ACME HTTP-01
//! challenge: a responder Pod, a Service in front of it, and either an
//! Ingress path or an HTTPRoute rule routing
//! `http://<domain>/.well-known/acme-challenge/<token>` to that Service.
//!
//! Every operation is a bounded read-reconcile-write sequence against a
//! [`ClusterStore`](crate::store::ClusterStore). Nothing waits for the cluster
//! to converge; "not yet" is returned to the caller, which requeues.

use crate::config::ControllerConfig;
use crate::constants;

mod cleanup;
mod error;
mod ingress;
pub mod naming;
mod orchestrator;
mod patch;
mod pod;
mod route;
mod service;

pub use cleanup::{CleanupReport, OrphanedBackend, SweepReport};
pub use error::SolverError;
pub use ingress::{merge_challenge_path, remove_challenge_paths, select_default_ingress_class};
pub use naming::{ChallengeIdentity, NameKind, SolverRef};
pub use orchestrator::{
    Http01SolverKind, LifecycleSignal, PendingReason, Readiness, Solver, SyncOutcome,
};
pub use pod::is_pod_ready;
pub use route::{merge_challenge_rule, remove_challenge_rules};

/// Path prefix the CA probes
pub const ACME_CHALLENGE_PATH_PREFIX: &str = "/.well-known/acme-challenge/";

/// Port the responder listens on, also used by the Service
pub const SOLVER_PORT: i32 = 8089;
pub const SOLVER_PORT_NAME: &str = "http";
pub const SOLVER_CONTAINER_NAME: &str = "acmesolver";
pub const SOLVER_HEALTH_PATH: &str = "/healthz";

/// Whether the challenge's routing rule is confirmed in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteState {
    Present,
    /// Another writer created the object first; re-read next time
    Pending,
}

/// Settings that shape solver resources but are not part of a Challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolverSettings {
    pub image: String,
    pub cpu_request: String,
    pub memory_request: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    /// Attempts per shared-object patch before giving up
    pub conflict_retry_limit: u32,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            image: constants::default_solver_image(),
            cpu_request: constants::DEFAULT_SOLVER_CPU_REQUEST.to_string(),
            memory_request: constants::DEFAULT_SOLVER_MEMORY_REQUEST.to_string(),
            cpu_limit: constants::DEFAULT_SOLVER_CPU_LIMIT.to_string(),
            memory_limit: constants::DEFAULT_SOLVER_MEMORY_LIMIT.to_string(),
            conflict_retry_limit: constants::DEFAULT_CONFLICT_RETRY_LIMIT,
        }
    }
}

impl From<&ControllerConfig> for SolverSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            image: config.solver_image.clone(),
            cpu_request: config.solver_cpu_request.clone(),
            memory_request: config.solver_memory_request.clone(),
            cpu_limit: config.solver_cpu_limit.clone(),
            memory_limit: config.solver_memory_limit.clone(),
            conflict_retry_limit: config.conflict_retry_limit,
        }
    }
}
