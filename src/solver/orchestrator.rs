//! # Solver Orchestrator
//!
//! Entry point for one Challenge. [`Solver::sync`] derives the lifecycle
//! signal and either drives the ensurers in dependency order (Pod, Service,
//! then Ingress or HTTPRoute) or hands the resource set to the cleanup
//! engine.
//!
//! The routing rule is only written once the pod is Running and Ready, so
//! reporting [`Readiness::Ready`] always means the CA can be told to probe.

use crate::crd::{
    AcmeChallengeSolver, Challenge, ChallengeType, Http01GatewayHttpRouteSolver,
    Http01IngressSolver,
};
use crate::solver::cleanup::{self, CleanupReport, SweepReport};
use crate::solver::ingress::{self, delete_owned_ingresses};
use crate::solver::naming::{ChallengeIdentity, SolverRef};
use crate::solver::pod::{self, PodState};
use crate::solver::route::{self, delete_owned_routes};
use crate::solver::service;
use crate::solver::{RouteState, SolverError, SolverSettings};
use crate::store::ClusterStore;
use std::fmt;
use tracing::debug;

/// The HTTP-01 variant configured on a Challenge
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Http01SolverKind<'a> {
    Ingress(&'a Http01IngressSolver),
    GatewayHttpRoute(&'a Http01GatewayHttpRouteSolver),
}

impl<'a> Http01SolverKind<'a> {
    /// Select the variant, rejecting configurations that name both, neither,
    /// or contradictory settings
    pub fn from_solver(solver: &'a AcmeChallengeSolver) -> Result<Self, SolverError> {
        let http01 = solver.http01.as_ref().ok_or_else(|| {
            SolverError::configuration("challenge solver has no http01 configuration")
        })?;

        let kind = match (&http01.ingress, &http01.gateway_http_route) {
            (Some(_), Some(_)) => {
                return Err(SolverError::configuration(
                    "http01 solver sets both ingress and gatewayHTTPRoute, only one may be set",
                ))
            }
            (None, None) => {
                return Err(SolverError::configuration(
                    "http01 solver sets neither ingress nor gatewayHTTPRoute",
                ))
            }
            (Some(ingress), None) => Http01SolverKind::Ingress(ingress),
            (None, Some(route)) => Http01SolverKind::GatewayHttpRoute(route),
        };

        match kind {
            Http01SolverKind::Ingress(ingress)
                if ingress.class.is_some() && ingress.ingress_class_name.is_some() =>
            {
                Err(SolverError::configuration(
                    "only one of class and ingressClassName may be set",
                ))
            }
            Http01SolverKind::GatewayHttpRoute(route)
                if route.parent_refs.is_empty() && route.name.is_none() =>
            {
                Err(SolverError::configuration(
                    "gatewayHTTPRoute needs parentRefs (or the name of an HTTPRoute to merge into)",
                ))
            }
            kind => Ok(kind),
        }
    }

    fn service_type(&self) -> Option<&'a str> {
        match self {
            Http01SolverKind::Ingress(ingress) => ingress.service_type.as_deref(),
            Http01SolverKind::GatewayHttpRoute(route) => route.service_type.as_deref(),
        }
    }
}

/// What the controller should do with a Challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    Solve,
    Cleanup,
    /// Not an HTTP-01 challenge
    Ignore,
}

impl LifecycleSignal {
    #[must_use]
    pub fn for_challenge(challenge: &Challenge) -> Self {
        if challenge.spec.challenge_type != ChallengeType::Http01 {
            LifecycleSignal::Ignore
        } else if challenge.is_resolved() {
            LifecycleSignal::Cleanup
        } else {
            LifecycleSignal::Solve
        }
    }
}

/// Why the solver is not ready yet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingReason {
    PodCreated,
    /// A drifted or terminating pod is being replaced
    PodReplacing,
    PodNotReady,
    /// The routing object was created concurrently and not yet re-read
    RouteNotConfirmed,
}

impl fmt::Display for PendingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            PendingReason::PodCreated => "solver pod created",
            PendingReason::PodReplacing => "solver pod being replaced",
            PendingReason::PodNotReady => "solver pod not ready",
            PendingReason::RouteNotConfirmed => "routing rule not confirmed",
        };
        f.write_str(reason)
    }
}

/// Whether the external path is in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending(PendingReason),
}

impl Readiness {
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }
}

/// Result of [`Solver::sync`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Solving(Readiness),
    CleanedUp(CleanupReport),
    Ignored,
}

/// HTTP-01 solver over a cluster store
#[derive(Debug)]
pub struct Solver<S> {
    store: S,
    settings: SolverSettings,
}

impl<S: ClusterStore> Solver<S> {
    pub fn new(store: S, settings: SolverSettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Solve or clean up, depending on the Challenge's lifecycle signal
    pub async fn sync(&self, challenge: &Challenge) -> Result<SyncOutcome, SolverError> {
        match LifecycleSignal::for_challenge(challenge) {
            LifecycleSignal::Ignore => Ok(SyncOutcome::Ignored),
            LifecycleSignal::Cleanup => {
                let solver_ref = ChallengeIdentity::from_challenge(challenge).solver_ref();
                Ok(SyncOutcome::CleanedUp(self.cleanup(&solver_ref).await?))
            }
            LifecycleSignal::Solve => Ok(SyncOutcome::Solving(self.solve(challenge).await?)),
        }
    }

    /// Converge the resource set for a pending Challenge. Never waits for
    /// the cluster; call again until [`Readiness::Ready`].
    pub async fn solve(&self, challenge: &Challenge) -> Result<Readiness, SolverError> {
        let kind = Http01SolverKind::from_solver(&challenge.spec.solver)?;
        let service_type = service::service_type(kind.service_type())?;
        let identity = ChallengeIdentity::from_challenge(challenge);

        // Variants are mutually exclusive per challenge
        match kind {
            Http01SolverKind::Ingress(_) => {
                delete_owned_routes(&self.store, &identity, None).await?;
            }
            Http01SolverKind::GatewayHttpRoute(_) => {
                delete_owned_ingresses(&self.store, &identity, None).await?;
            }
        }

        let pod = pod::ensure_pod(&self.store, &self.settings, &identity, challenge).await?;
        let reason = match pod.state {
            PodState::Created => Some(PendingReason::PodCreated),
            PodState::Replacing => Some(PendingReason::PodReplacing),
            PodState::Existing { ready: false } => Some(PendingReason::PodNotReady),
            PodState::Existing { ready: true } => None,
        };
        if let Some(reason) = reason {
            debug!("Solver pod {}/{}: {}", identity.namespace, pod.name, reason);
            return Ok(Readiness::Pending(reason));
        }

        let service_name =
            service::ensure_service(&self.store, &identity, challenge, service_type).await?;

        let route_state = match kind {
            Http01SolverKind::Ingress(config) => {
                ingress::ensure_ingress_rule(
                    &self.store,
                    &self.settings,
                    &identity,
                    challenge,
                    config,
                    &service_name,
                )
                .await?
            }
            Http01SolverKind::GatewayHttpRoute(config) => {
                route::ensure_route_rule(
                    &self.store,
                    &self.settings,
                    &identity,
                    challenge,
                    config,
                    &service_name,
                )
                .await?
            }
        };

        Ok(match route_state {
            RouteState::Present => Readiness::Ready,
            RouteState::Pending => Readiness::Pending(PendingReason::RouteNotConfirmed),
        })
    }

    /// Remove every resource and fragment of a resource set
    pub async fn cleanup(&self, solver_ref: &SolverRef) -> Result<CleanupReport, SolverError> {
        cleanup::cleanup(&self.store, &self.settings, solver_ref).await
    }

    /// Clean up resource sets whose Challenge is gone, changed or resolved
    pub async fn sweep_orphans(&self, namespace: Option<&str>) -> Result<SweepReport, SolverError> {
        cleanup::sweep_orphans(&self.store, &self.settings, namespace).await
    }
}
