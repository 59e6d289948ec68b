//! # Ingress Merger
//!
//! Routes `http://<dnsName>/.well-known/acme-challenge/<token>` to the solver
//! Service through an Ingress.
//!
//! - **Exclusive mode**: the solver creates and owns a one-rule Ingress.
//! - **Merge mode**: the challenge path is patched into an existing Ingress
//!   owned by someone else. Only `spec.rules` is written, always with the read
//!   `resourceVersion` as precondition, and the fragment is recognised later
//!   by its backend (the solver's deterministic Service name).
//!
//! Rule order is significant for first-match ingress controllers, so merges
//! never reorder what is already there.

use crate::crd::{Challenge, Http01IngressSolver};
use crate::observability::metrics;
use crate::solver::naming::{
    identity_hash_of, ChallengeIdentity, NameKind, ROUTE_OWNER_LABEL, SOLVER_LABEL,
};
use crate::solver::patch::{patch_with_retry, PatchOutcome};
use crate::solver::{RouteState, SolverError, SolverSettings, SOLVER_PORT};
use crate::store::{ClusterStore, StoreError};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressClass, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Legacy ingress class annotation, used for the `class` field
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
/// Marks the cluster's default IngressClass
pub const DEFAULT_INGRESS_CLASS_ANNOTATION: &str = "ingressclass.kubernetes.io/is-default-class";
/// Lets the CA reach solver Ingresses behind source-range restricted controllers
pub const WHITELIST_SOURCE_RANGE_ANNOTATION: &str =
    "nginx.ingress.kubernetes.io/whitelist-source-range";

const CHALLENGE_PATH_TYPE: &str = "ImplementationSpecific";

/// How a solver-created Ingress selects its controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IngressClassChoice {
    /// `spec.ingressClassName`
    ClassName(String),
    /// `kubernetes.io/ingress.class` annotation
    Annotation(String),
}

/// Where the challenge path goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IngressTarget {
    Exclusive(IngressClassChoice),
    Merge {
        name: String,
        /// Named in the configuration, as opposed to found by host
        designated: bool,
    },
}

/// Decide between exclusive and merge mode for this challenge
pub(crate) async fn resolve_target<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    config: &Http01IngressSolver,
) -> Result<IngressTarget, SolverError> {
    if let Some(name) = config.name.as_deref().filter(|n| !n.is_empty()) {
        return Ok(IngressTarget::Merge {
            name: name.to_string(),
            designated: true,
        });
    }

    if config.merge_by_host {
        let mut candidates: Vec<String> = store
            .list::<Ingress>(Some(&identity.namespace), None)
            .await?
            .into_iter()
            .filter(|ing| !ing.labels().contains_key(SOLVER_LABEL))
            .filter(|ing| serves_host(ing, &identity.dns_name))
            .map(|ing| ing.name_any())
            .collect();
        candidates.sort();
        if let Some(name) = candidates.into_iter().next() {
            return Ok(IngressTarget::Merge {
                name,
                designated: false,
            });
        }
        debug!(
            "No Ingress in {} serves {}, falling back to a solver-owned Ingress",
            identity.namespace, identity.dns_name
        );
    }

    let class = match (&config.class, &config.ingress_class_name) {
        (Some(_), Some(_)) => {
            return Err(SolverError::configuration(
                "only one of class and ingressClassName may be set",
            ))
        }
        (Some(class), None) => IngressClassChoice::Annotation(class.clone()),
        (None, Some(class_name)) => IngressClassChoice::ClassName(class_name.clone()),
        (None, None) => {
            let classes = store.list_ingress_classes().await?;
            IngressClassChoice::ClassName(select_default_ingress_class(&classes)?)
        }
    };
    Ok(IngressTarget::Exclusive(class))
}

/// Pick the IngressClass for solver Ingresses when none is configured.
///
/// Among classes annotated as default the lexicographically smallest name
/// wins; with no default, a single class is used; anything else is a
/// configuration error.
pub fn select_default_ingress_class(classes: &[IngressClass]) -> Result<String, SolverError> {
    let mut defaults: Vec<String> = classes
        .iter()
        .filter(|c| {
            c.annotations()
                .get(DEFAULT_INGRESS_CLASS_ANNOTATION)
                .is_some_and(|v| v == "true")
        })
        .map(ResourceExt::name_any)
        .collect();
    defaults.sort();
    if let Some(first) = defaults.into_iter().next() {
        return Ok(first);
    }

    match classes {
        [] => Err(SolverError::configuration(
            "no ingressClassName or class is set and the cluster has no IngressClass",
        )),
        [only] => Ok(only.name_any()),
        many => {
            let mut names: Vec<String> = many.iter().map(ResourceExt::name_any).collect();
            names.sort();
            Err(SolverError::configuration(format!(
                "no ingressClassName or class is set and none of the IngressClasses [{}] is marked as default",
                names.join(", ")
            )))
        }
    }
}

/// Ensure the challenge path routes to `service_name`
pub(crate) async fn ensure_ingress_rule<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01IngressSolver,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    match resolve_target(store, identity, config).await? {
        IngressTarget::Exclusive(class) => {
            ensure_exclusive(store, identity, challenge, config, &class, service_name).await
        }
        IngressTarget::Merge { name, designated } => {
            // A solver-owned Ingress from an earlier exclusive configuration
            delete_owned_ingresses(store, identity, None).await?;
            ensure_merged(store, settings, identity, &name, designated, service_name).await
        }
    }
}

async fn ensure_exclusive<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01IngressSolver,
    class: &IngressClassChoice,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    let namespace = &identity.namespace;
    let desired = build_ingress(identity, challenge, config, class, service_name);
    let name = desired.name_any();

    delete_owned_ingresses(store, identity, Some(&name)).await?;

    let Some(current) = store.get::<Ingress>(namespace, &name).await? else {
        return match store.create(namespace, &desired).await {
            Ok(_) => {
                metrics::increment_solver_resources_created("Ingress");
                info!("Created solver ingress {}/{}", namespace, name);
                Ok(RouteState::Present)
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(RouteState::Pending),
            Err(e) => Err(e.into()),
        };
    };

    let current_spec = current.spec.clone().unwrap_or_default();
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let desired_annotation = match class {
        IngressClassChoice::Annotation(class) => Some(class.as_str()),
        IngressClassChoice::ClassName(_) => None,
    };
    let current_annotation = current
        .annotations()
        .get(INGRESS_CLASS_ANNOTATION)
        .map(String::as_str);

    if current_spec.rules != desired_spec.rules
        || current_spec.ingress_class_name != desired_spec.ingress_class_name
        || current_annotation != desired_annotation
    {
        info!("Solver ingress {}/{} drifted, patching", namespace, name);
        let patch = json!({
            "metadata": {"annotations": {INGRESS_CLASS_ANNOTATION: desired_annotation}},
            "spec": {
                "ingressClassName": desired_spec.ingress_class_name,
                "rules": desired_spec.rules,
            }
        });
        store.patch::<Ingress>(namespace, &name, &patch).await?;
    }
    Ok(RouteState::Present)
}

async fn ensure_merged<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    name: &str,
    designated: bool,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    let namespace = &identity.namespace;
    let host = identity.dns_name.as_str();
    let path = identity.challenge_path();

    let outcome = patch_with_retry::<_, Ingress, _>(
        store,
        namespace,
        name,
        settings.conflict_retry_limit,
        |ingress| {
            let rules = ingress.spec.as_ref().and_then(|s| s.rules.as_deref());
            merge_challenge_path(rules.unwrap_or_default(), host, &path, service_name)
                .map(|rules| json!({"spec": {"rules": rules}}))
        },
    )
    .await?;

    match outcome {
        PatchOutcome::Patched => {
            info!(
                "Merged challenge path for {} into ingress {}/{}",
                host, namespace, name
            );
            Ok(RouteState::Present)
        }
        PatchOutcome::Unchanged => Ok(RouteState::Present),
        PatchOutcome::Missing if designated => Err(SolverError::configuration(format!(
            "Ingress {namespace}/{name} named for merging does not exist"
        ))),
        PatchOutcome::Missing => Ok(RouteState::Pending),
    }
}

/// Delete solver-owned Ingresses of this identity, except `keep`
pub(crate) async fn delete_owned_ingresses<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    keep: Option<&str>,
) -> Result<usize, SolverError> {
    let namespace = &identity.namespace;
    let owned: Vec<Ingress> = store
        .list(Some(namespace), Some(&identity.solver_ref().selector()))
        .await?;
    let mut deleted = 0;
    for ingress in owned {
        let name = ingress.name_any();
        if keep == Some(name.as_str()) {
            continue;
        }
        warn!("Deleting stale solver ingress {}/{}", namespace, name);
        if store.delete::<Ingress>(namespace, &name).await? {
            metrics::increment_solver_resources_deleted("Ingress");
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn build_ingress(
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01IngressSolver,
    class: &IngressClassChoice,
    service_name: &str,
) -> Ingress {
    let template = config.ingress_template.as_ref();

    let mut labels = template.map(|t| t.labels.clone()).unwrap_or_default();
    labels.extend(identity.labels());
    labels.insert(ROUTE_OWNER_LABEL.to_string(), "true".to_string());

    let mut annotations = template.map(|t| t.annotations.clone()).unwrap_or_default();
    annotations.insert(
        WHITELIST_SOURCE_RANGE_ANNOTATION.to_string(),
        "0.0.0.0/0,::/0".to_string(),
    );
    annotations.extend(identity.annotations());

    let ingress_class_name = match class {
        IngressClassChoice::ClassName(name) => Some(name.clone()),
        IngressClassChoice::Annotation(class) => {
            annotations.insert(INGRESS_CLASS_ANNOTATION.to_string(), class.clone());
            None
        }
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(identity.resource_name(NameKind::Ingress)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: challenge.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name,
            rules: Some(vec![IngressRule {
                host: Some(identity.dns_name.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![challenge_path(&identity.challenge_path(), service_name)],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn challenge_path(path: &str, service_name: &str) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: CHALLENGE_PATH_TYPE.to_string(),
        backend: service_backend(service_name),
    }
}

fn service_backend(service_name: &str) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: service_name.to_string(),
            port: Some(ServiceBackendPort {
                number: Some(SOLVER_PORT),
                ..Default::default()
            }),
        }),
        ..Default::default()
    }
}

fn targets_service(path: &HTTPIngressPath, service_name: &str) -> bool {
    path.backend
        .service
        .as_ref()
        .is_some_and(|s| s.name == service_name)
}

fn routes_to_solver(path: &HTTPIngressPath) -> bool {
    path.backend
        .service
        .as_ref()
        .is_some_and(|s| identity_hash_of(&s.name).is_some())
}

fn serves_host(ingress: &Ingress, host: &str) -> bool {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.as_ref())
        .is_some_and(|rules| rules.iter().any(|r| r.host.as_deref() == Some(host)))
}

/// Rules with the challenge path routed to `service_name`, or `None` when
/// the rules already do that.
///
/// A host+path left behind by an earlier solver gets its backend replaced in
/// place; a user's own path for the same host+path is never touched.
/// Otherwise the path goes to the front of the first rule for the host that
/// has an `http` block, or a new rule for the host is appended.
#[must_use]
pub fn merge_challenge_path(
    rules: &[IngressRule],
    host: &str,
    path: &str,
    service_name: &str,
) -> Option<Vec<IngressRule>> {
    let desired_backend = service_backend(service_name);
    let mut merged = rules.to_vec();

    let same_path = merged
        .iter_mut()
        .filter(|r| r.host.as_deref() == Some(host))
        .filter_map(|r| r.http.as_mut())
        .flat_map(|http| http.paths.iter_mut())
        .filter(|p| p.path.as_deref() == Some(path));
    let mut stale = None;
    for existing in same_path {
        if existing.backend == desired_backend {
            return None;
        }
        if stale.is_none() && routes_to_solver(existing) {
            stale = Some(existing);
        }
    }
    if let Some(stale) = stale {
        stale.backend = desired_backend;
        return Some(merged);
    }

    let host_rule = merged
        .iter_mut()
        .filter(|r| r.host.as_deref() == Some(host))
        .find_map(|r| r.http.as_mut());
    match host_rule {
        Some(http) => http.paths.insert(0, challenge_path(path, service_name)),
        None => merged.push(IngressRule {
            host: Some(host.to_string()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![challenge_path(path, service_name)],
            }),
        }),
    }
    Some(merged)
}

/// Rules without any path routed to `service_name`, or `None` when there is
/// nothing to remove. A rule left without paths is dropped.
#[must_use]
pub fn remove_challenge_paths(
    rules: &[IngressRule],
    service_name: &str,
) -> Option<Vec<IngressRule>> {
    let owns_any = rules
        .iter()
        .filter_map(|r| r.http.as_ref())
        .flat_map(|http| http.paths.iter())
        .any(|p| targets_service(p, service_name));
    if !owns_any {
        return None;
    }

    let remaining = rules
        .iter()
        .filter_map(|rule| {
            let Some(http) = rule.http.as_ref() else {
                return Some(rule.clone());
            };
            if !http.paths.iter().any(|p| targets_service(p, service_name)) {
                return Some(rule.clone());
            }
            let paths: Vec<HTTPIngressPath> = http
                .paths
                .iter()
                .filter(|p| !targets_service(p, service_name))
                .cloned()
                .collect();
            (!paths.is_empty()).then(|| IngressRule {
                host: rule.host.clone(),
                http: Some(HTTPIngressRuleValue { paths }),
            })
        })
        .collect();
    Some(remaining)
}

/// Merge patch writing `rules`; an empty list clears the field
pub(crate) fn rules_patch(rules: &[IngressRule]) -> Value {
    if rules.is_empty() {
        json!({"spec": {"rules": null}})
    } else {
        json!({"spec": {"rules": rules}})
    }
}
