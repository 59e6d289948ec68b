//! # Cleanup Engine
//!
//! Removes everything created on behalf of one challenge, working from the
//! [`SolverRef`] alone since the Challenge may already be gone. Routing goes
//! first, so the CA can never be sent to a Service without a pod:
//!
//! 1. solver-owned Ingresses and HTTPRoutes are deleted
//! 2. challenge fragments are cut out of shared Ingresses and HTTPRoutes
//! 3. the Service, then the Pod, are deleted
//!
//! The orphan sweep applies the same cleanup to every solver-labelled
//! resource set whose Challenge is gone, has changed identity, or is
//! resolved. Fragments in shared objects carry no labels and can outlive
//! their Pod and Service (the garbage collector follows the owner
//! reference), so the sweep also attributes them by the identity hash in
//! the backend Service name.

use crate::crd::{Challenge, HttpRoute};
use crate::observability::metrics;
use crate::solver::ingress::{remove_challenge_paths, rules_patch};
use crate::solver::naming::{
    all_solvers_selector, identity_hash_of, ChallengeIdentity, NameKind, SolverRef,
    CHALLENGE_NAMESPACE_ANNOTATION, CHALLENGE_NAME_ANNOTATION, DNS_NAME_ANNOTATION,
    IDENTITY_LABEL,
};
use crate::solver::patch::{patch_with_retry, PatchOutcome};
use crate::solver::route::remove_challenge_rules;
use crate::solver::{SolverError, SolverSettings};
use crate::store::{ClusterStore, StoreObject};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// What one cleanup removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub ingresses_deleted: usize,
    pub routes_deleted: usize,
    /// Shared Ingresses the challenge path was removed from
    pub ingress_fragments_removed: usize,
    /// Shared HTTPRoutes the challenge rule was removed from
    pub route_fragments_removed: usize,
    pub services_deleted: usize,
    pub pods_deleted: usize,
}

impl CleanupReport {
    /// True when there was nothing left to clean up
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn absorb(&mut self, other: &CleanupReport) {
        self.ingresses_deleted += other.ingresses_deleted;
        self.routes_deleted += other.routes_deleted;
        self.ingress_fragments_removed += other.ingress_fragments_removed;
        self.route_fragments_removed += other.route_fragments_removed;
        self.services_deleted += other.services_deleted;
        self.pods_deleted += other.pods_deleted;
    }
}

/// Outcome of one orphan sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resource sets whose Challenge still wants them
    pub live: usize,
    /// Resource sets that were cleaned up
    pub orphans: Vec<SolverRef>,
    /// Resource sets whose cleanup failed; retried by the next sweep
    pub failed: Vec<SolverRef>,
    /// Solver-labelled objects without the annotations needed to find
    /// their Challenge; left alone
    pub unattributed: usize,
    /// Merged fragments cleaned up after their labelled resource set was
    /// already gone
    pub orphaned_backends: Vec<OrphanedBackend>,
    pub removed: CleanupReport,
}

/// Solver Service a shared Ingress or HTTPRoute still routes to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrphanedBackend {
    pub namespace: String,
    pub service_name: String,
}

/// Remove every resource and fragment belonging to `solver_ref`
pub(crate) async fn cleanup<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    solver_ref: &SolverRef,
) -> Result<CleanupReport, SolverError> {
    let namespace = solver_ref.namespace.as_str();
    let service_name = solver_ref.resource_name(NameKind::Service);
    let mut report = CleanupReport::default();

    report.ingresses_deleted = delete_labelled::<S, Ingress>(store, solver_ref).await?;
    report.routes_deleted = delete_labelled::<S, HttpRoute>(store, solver_ref).await?;
    remove_fragments(store, settings, namespace, &service_name, &mut report).await?;

    report.services_deleted = delete_labelled::<S, Service>(store, solver_ref).await?;
    report.pods_deleted = delete_labelled::<S, Pod>(store, solver_ref).await?;

    debug!(
        "Cleanup of {}/{} removed {:?}",
        namespace, solver_ref.identity_hash, report
    );
    Ok(report)
}

/// Cut every path and rule routed to `service_name` out of the Ingresses
/// and HTTPRoutes in `namespace`
async fn remove_fragments<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    namespace: &str,
    service_name: &str,
    report: &mut CleanupReport,
) -> Result<(), SolverError> {
    for ingress in store.list::<Ingress>(Some(namespace), None).await? {
        let rules = ingress.spec.as_ref().and_then(|s| s.rules.as_deref());
        if remove_challenge_paths(rules.unwrap_or_default(), service_name).is_none() {
            continue;
        }
        let name = ingress.name_any();
        let outcome = patch_with_retry::<_, Ingress, _>(
            store,
            namespace,
            &name,
            settings.conflict_retry_limit,
            |fresh| {
                let rules = fresh.spec.as_ref().and_then(|s| s.rules.as_deref());
                remove_challenge_paths(rules.unwrap_or_default(), service_name)
                    .map(|remaining| rules_patch(&remaining))
            },
        )
        .await?;
        if outcome == PatchOutcome::Patched {
            info!("Removed challenge path from ingress {}/{}", namespace, name);
            report.ingress_fragments_removed += 1;
        }
    }

    for route in store.list::<HttpRoute>(Some(namespace), None).await? {
        if remove_challenge_rules(&route.spec.rules, service_name).is_none() {
            continue;
        }
        let name = route.name_any();
        let outcome = patch_with_retry::<_, HttpRoute, _>(
            store,
            namespace,
            &name,
            settings.conflict_retry_limit,
            |fresh| {
                remove_challenge_rules(&fresh.spec.rules, service_name)
                    .map(|remaining| json!({"spec": {"rules": remaining}}))
            },
        )
        .await?;
        if outcome == PatchOutcome::Patched {
            info!("Removed challenge rule from HTTPRoute {}/{}", namespace, name);
            report.route_fragments_removed += 1;
        }
    }
    Ok(())
}

async fn delete_labelled<S: ClusterStore, K: StoreObject>(
    store: &S,
    solver_ref: &SolverRef,
) -> Result<usize, SolverError> {
    let namespace = solver_ref.namespace.as_str();
    let kind = K::kind(&());
    let mut deleted = 0;
    for object in store
        .list::<K>(Some(namespace), Some(&solver_ref.selector()))
        .await?
    {
        let name = object.name_any();
        if store.delete::<K>(namespace, &name).await? {
            info!("Deleted solver {} {}/{}", kind, namespace, name);
            metrics::increment_solver_resources_deleted(&kind);
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Challenge a resource set was created for, as recorded in its annotations
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChallengeRef {
    namespace: String,
    name: String,
}

type Groups = BTreeMap<SolverRef, ChallengeRef>;

/// Find solver resource sets whose Challenge no longer wants them and clean
/// them up. `namespace` limits the sweep; `None` sweeps all namespaces.
pub(crate) async fn sweep_orphans<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    namespace: Option<&str>,
) -> Result<SweepReport, SolverError> {
    let mut groups = Groups::new();
    let mut report = SweepReport::default();

    report.unattributed += collect::<S, Pod>(store, namespace, &mut groups).await?;
    report.unattributed += collect::<S, Service>(store, namespace, &mut groups).await?;
    report.unattributed += collect::<S, Ingress>(store, namespace, &mut groups).await?;
    report.unattributed += collect::<S, HttpRoute>(store, namespace, &mut groups).await?;
    // Listed before any Challenge is read, so a fragment seen here belongs to
    // a Challenge that already existed
    let backends = collect_backends(store, namespace).await?;

    let grouped: BTreeSet<(String, String)> = groups
        .keys()
        .map(|r| (r.namespace.clone(), r.identity_hash.clone()))
        .collect();

    for (solver_ref, challenge_ref) in groups {
        let challenge = store
            .get::<Challenge>(&challenge_ref.namespace, &challenge_ref.name)
            .await?;
        let reason = match &challenge {
            None => Some("challenge no longer exists"),
            Some(c) if ChallengeIdentity::from_challenge(c).hash() != solver_ref.identity_hash => {
                Some("challenge identity changed")
            }
            Some(c) if c.is_resolved() => Some("challenge is resolved"),
            Some(_) => None,
        };
        let Some(reason) = reason else {
            report.live += 1;
            continue;
        };

        info!(
            "Sweeping orphaned solver resources {}/{} for {} ({})",
            solver_ref.namespace, solver_ref.identity_hash, solver_ref.dns_name, reason
        );
        match cleanup(store, settings, &solver_ref).await {
            Ok(removed) => {
                metrics::increment_orphans_swept();
                report.removed.absorb(&removed);
                report.orphans.push(solver_ref);
            }
            Err(e) => {
                warn!(
                    "Failed to sweep orphaned solver resources {}/{}: {}",
                    solver_ref.namespace, solver_ref.identity_hash, e
                );
                report.failed.push(solver_ref);
            }
        }
    }

    if backends.is_empty() {
        return Ok(report);
    }
    let live = live_identities(store, namespace).await?;
    for backend in backends {
        let Some(hash) = identity_hash_of(&backend.service_name) else {
            continue;
        };
        let key = (backend.namespace.clone(), hash.to_string());
        if grouped.contains(&key) || live.contains(&key) {
            continue;
        }

        info!(
            "Sweeping challenge fragments routed to {}/{}, no live challenge has identity {}",
            backend.namespace, backend.service_name, hash
        );
        let mut removed = CleanupReport::default();
        match remove_fragments(
            store,
            settings,
            &backend.namespace,
            &backend.service_name,
            &mut removed,
        )
        .await
        {
            Ok(()) => {
                metrics::increment_orphans_swept();
                report.removed.absorb(&removed);
                report.orphaned_backends.push(backend);
            }
            Err(e) => warn!(
                "Failed to sweep challenge fragments routed to {}/{}: {}",
                backend.namespace, backend.service_name, e
            ),
        }
    }

    Ok(report)
}

/// Solver Services referenced from any Ingress or HTTPRoute
async fn collect_backends<S: ClusterStore>(
    store: &S,
    namespace: Option<&str>,
) -> Result<BTreeSet<OrphanedBackend>, SolverError> {
    let mut backends = BTreeSet::new();
    let mut add = |namespace: Option<String>, service_name: &str| {
        if let (Some(namespace), Some(_)) = (namespace, identity_hash_of(service_name)) {
            backends.insert(OrphanedBackend {
                namespace,
                service_name: service_name.to_string(),
            });
        }
    };

    for ingress in store.list::<Ingress>(namespace, None).await? {
        let paths = ingress
            .spec
            .iter()
            .flat_map(|s| s.rules.iter().flatten())
            .filter_map(|r| r.http.as_ref())
            .flat_map(|http| http.paths.iter());
        for path in paths {
            if let Some(service) = &path.backend.service {
                add(ingress.namespace(), &service.name);
            }
        }
    }
    for route in store.list::<HttpRoute>(namespace, None).await? {
        let backend_refs = route.spec.rules.iter().flat_map(|r| r.backend_refs.iter());
        for backend in backend_refs {
            if backend.is_local_service() {
                add(route.namespace(), &backend.name);
            }
        }
    }
    Ok(backends)
}

/// `(namespace, identity hash)` of every Challenge that still wants a solver
async fn live_identities<S: ClusterStore>(
    store: &S,
    namespace: Option<&str>,
) -> Result<BTreeSet<(String, String)>, SolverError> {
    Ok(store
        .list::<Challenge>(namespace, None)
        .await?
        .iter()
        .filter(|c| !c.is_resolved())
        .map(|c| {
            let identity = ChallengeIdentity::from_challenge(c);
            (identity.namespace.clone(), identity.hash())
        })
        .collect())
}

/// Group solver-labelled objects of kind `K` by resource set.
/// Returns the number of objects that could not be attributed.
async fn collect<S: ClusterStore, K: StoreObject>(
    store: &S,
    namespace: Option<&str>,
    groups: &mut Groups,
) -> Result<usize, SolverError> {
    let mut unattributed = 0;
    for object in store
        .list::<K>(namespace, Some(&all_solvers_selector()))
        .await?
    {
        let annotations = object.annotations();
        let attributed = (
            object.namespace(),
            object.labels().get(IDENTITY_LABEL),
            annotations.get(CHALLENGE_NAME_ANNOTATION),
            annotations.get(CHALLENGE_NAMESPACE_ANNOTATION),
            annotations.get(DNS_NAME_ANNOTATION),
        );
        let (Some(namespace), Some(hash), Some(name), Some(challenge_namespace), Some(dns_name)) =
            attributed
        else {
            debug!(
                "Solver-labelled {} {} lacks challenge annotations, leaving it alone",
                K::kind(&()),
                object.name_any()
            );
            unattributed += 1;
            continue;
        };

        groups
            .entry(SolverRef {
                namespace,
                identity_hash: hash.clone(),
                dns_name: dns_name.clone(),
            })
            .or_insert_with(|| ChallengeRef {
                namespace: challenge_namespace.clone(),
                name: name.clone(),
            });
    }
    Ok(unattributed)
}
