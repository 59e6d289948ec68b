//! # HTTPRoute Merger
//!
//! Gateway API counterpart of the Ingress merger. Without `name` the solver
//! creates and owns an HTTPRoute attached to the configured parent
//! Gateways; with `name` the challenge rule is patched into that existing
//! route. Gateway API orders matches by specificity, so the rule is simply
//! appended.

use crate::crd::{
    Challenge, Http01GatewayHttpRouteSolver, HttpBackendRef, HttpPathMatch, HttpRoute,
    HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
};
use crate::observability::metrics;
use crate::solver::naming::{identity_hash_of, ChallengeIdentity, NameKind, ROUTE_OWNER_LABEL};
use crate::solver::patch::{patch_with_retry, PatchOutcome};
use crate::solver::{RouteState, SolverError, SolverSettings, SOLVER_PORT};
use crate::store::{ClusterStore, StoreError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{info, warn};

const EXACT_MATCH: &str = "Exact";

/// Ensure the challenge rule routes to `service_name`
pub(crate) async fn ensure_route_rule<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01GatewayHttpRouteSolver,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    match config.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => {
            delete_owned_routes(store, identity, None).await?;
            ensure_merged(store, settings, identity, name, service_name).await
        }
        None => ensure_exclusive(store, identity, challenge, config, service_name).await,
    }
}

async fn ensure_exclusive<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01GatewayHttpRouteSolver,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    let namespace = &identity.namespace;
    let desired = build_route(identity, challenge, config, service_name);
    let name = desired.name_any();

    delete_owned_routes(store, identity, Some(&name)).await?;

    let Some(current) = store.get::<HttpRoute>(namespace, &name).await? else {
        return match store.create(namespace, &desired).await {
            Ok(_) => {
                metrics::increment_solver_resources_created("HTTPRoute");
                info!("Created solver HTTPRoute {}/{}", namespace, name);
                Ok(RouteState::Present)
            }
            Err(StoreError::AlreadyExists { .. }) => Ok(RouteState::Pending),
            Err(e) => Err(e.into()),
        };
    };

    if route_drifted(&current.spec, &desired.spec, &identity.challenge_path(), service_name) {
        info!("Solver HTTPRoute {}/{} drifted, patching", namespace, name);
        let patch = json!({
            "spec": {
                "parentRefs": desired.spec.parent_refs,
                "hostnames": desired.spec.hostnames,
                "rules": desired.spec.rules,
            }
        });
        store.patch::<HttpRoute>(namespace, &name, &patch).await?;
    }
    Ok(RouteState::Present)
}

async fn ensure_merged<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    name: &str,
    service_name: &str,
) -> Result<RouteState, SolverError> {
    let namespace = &identity.namespace;
    let Some(target) = store.get::<HttpRoute>(namespace, name).await? else {
        return Err(missing_target(namespace, name));
    };
    let hostnames = &target.spec.hostnames;
    if !hostnames.is_empty() && !hostnames.iter().any(|h| hostname_matches(h, &identity.dns_name)) {
        return Err(SolverError::configuration(format!(
            "HTTPRoute {namespace}/{name} named for merging does not serve {} (hostnames: {})",
            identity.dns_name,
            hostnames.join(", ")
        )));
    }

    let path = identity.challenge_path();
    let outcome = patch_with_retry::<_, HttpRoute, _>(
        store,
        namespace,
        name,
        settings.conflict_retry_limit,
        |route| {
            merge_challenge_rule(&route.spec.rules, &path, service_name)
                .map(|rules| json!({"spec": {"rules": rules}}))
        },
    )
    .await?;

    match outcome {
        PatchOutcome::Patched => {
            info!(
                "Merged challenge rule for {} into HTTPRoute {}/{}",
                identity.dns_name, namespace, name
            );
            Ok(RouteState::Present)
        }
        PatchOutcome::Unchanged => Ok(RouteState::Present),
        PatchOutcome::Missing => Err(missing_target(namespace, name)),
    }
}

fn missing_target(namespace: &str, name: &str) -> SolverError {
    SolverError::configuration(format!(
        "HTTPRoute {namespace}/{name} named for merging does not exist"
    ))
}

/// Delete solver-owned HTTPRoutes of this identity, except `keep`
pub(crate) async fn delete_owned_routes<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    keep: Option<&str>,
) -> Result<usize, SolverError> {
    let namespace = &identity.namespace;
    let owned: Vec<HttpRoute> = store
        .list(Some(namespace), Some(&identity.solver_ref().selector()))
        .await?;
    let mut deleted = 0;
    for route in owned {
        let name = route.name_any();
        if keep == Some(name.as_str()) {
            continue;
        }
        warn!("Deleting stale solver HTTPRoute {}/{}", namespace, name);
        if store.delete::<HttpRoute>(namespace, &name).await? {
            metrics::increment_solver_resources_deleted("HTTPRoute");
            deleted += 1;
        }
    }
    Ok(deleted)
}

fn build_route(
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    config: &Http01GatewayHttpRouteSolver,
    service_name: &str,
) -> HttpRoute {
    let mut labels = config.labels.clone();
    labels.extend(identity.labels());
    labels.insert(ROUTE_OWNER_LABEL.to_string(), "true".to_string());

    HttpRoute {
        metadata: ObjectMeta {
            name: Some(identity.resource_name(NameKind::HttpRoute)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(labels),
            annotations: Some(identity.annotations()),
            owner_references: challenge.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: HttpRouteSpec {
            parent_refs: config.parent_refs.clone(),
            hostnames: vec![identity.dns_name.clone()],
            rules: vec![challenge_rule(&identity.challenge_path(), service_name)],
        },
    }
}

fn challenge_rule(path: &str, service_name: &str) -> HttpRouteRule {
    HttpRouteRule {
        matches: vec![HttpRouteMatch {
            path: Some(HttpPathMatch {
                match_type: Some(EXACT_MATCH.to_string()),
                value: Some(path.to_string()),
            }),
            ..Default::default()
        }],
        backend_refs: vec![challenge_backend(service_name)],
        ..Default::default()
    }
}

fn challenge_backend(service_name: &str) -> HttpBackendRef {
    HttpBackendRef {
        name: service_name.to_string(),
        port: Some(SOLVER_PORT),
        ..Default::default()
    }
}

fn matches_path(rule: &HttpRouteRule, path: &str) -> bool {
    rule.matches
        .iter()
        .filter_map(|m| m.path.as_ref())
        .any(|p| p.value.as_deref() == Some(path))
}

fn routes_to(rule: &HttpRouteRule, service_name: &str) -> bool {
    rule.backend_refs.iter().any(|b| b.targets_service(service_name))
}

/// Ignores fields the API server defaults (`group`, `kind`, `weight`)
fn routes_only_to(rule: &HttpRouteRule, service_name: &str) -> bool {
    matches!(
        rule.backend_refs.as_slice(),
        [backend] if backend.targets_service(service_name) && backend.port == Some(SOLVER_PORT)
    )
}

/// Compare an owned route with its desired state, tolerating server defaults
fn route_drifted(current: &HttpRouteSpec, desired: &HttpRouteSpec, path: &str, service_name: &str) -> bool {
    let parents = |spec: &HttpRouteSpec| -> Vec<(String, Option<String>, Option<String>, Option<i32>)> {
        spec.parent_refs
            .iter()
            .map(|p| (p.name.clone(), p.namespace.clone(), p.section_name.clone(), p.port))
            .collect()
    };
    let rule_in_place = matches!(
        current.rules.as_slice(),
        [rule] if matches_path(rule, path) && routes_only_to(rule, service_name)
    );
    current.hostnames != desired.hostnames || parents(current) != parents(desired) || !rule_in_place
}

/// `*.example.com` matches `www.example.com` but not `example.com`
fn hostname_matches(hostname: &str, dns_name: &str) -> bool {
    let hostname = hostname.to_ascii_lowercase();
    let dns_name = dns_name.to_ascii_lowercase();
    match hostname.strip_prefix('*') {
        Some(suffix) => dns_name.len() > suffix.len() && dns_name.ends_with(suffix),
        None => hostname == dns_name,
    }
}

/// Rules with the challenge rule routed to `service_name` appended, or
/// `None` when it is already there. A challenge rule left behind by an
/// earlier solver gets its backends replaced in place; user rules are never
/// rewritten, even when one of their matches is the challenge path.
#[must_use]
pub fn merge_challenge_rule(
    rules: &[HttpRouteRule],
    path: &str,
    service_name: &str,
) -> Option<Vec<HttpRouteRule>> {
    if rules
        .iter()
        .any(|r| is_challenge_rule(r, path) && routes_only_to(r, service_name))
    {
        return None;
    }

    let mut merged = rules.to_vec();
    let stale = merged
        .iter_mut()
        .find(|r| is_challenge_rule(r, path) && routes_only_to_solvers(r));
    match stale {
        Some(existing) => existing.backend_refs = vec![challenge_backend(service_name)],
        None => merged.push(challenge_rule(path, service_name)),
    }
    Some(merged)
}

/// A rule whose single match is exactly the challenge path
fn is_challenge_rule(rule: &HttpRouteRule, path: &str) -> bool {
    matches!(
        rule.matches.as_slice(),
        [m] if m.extra.is_empty()
            && m.path.as_ref().and_then(|p| p.value.as_deref()) == Some(path)
    )
}

fn routes_only_to_solvers(rule: &HttpRouteRule) -> bool {
    !rule.backend_refs.is_empty()
        && rule
            .backend_refs
            .iter()
            .all(|b| b.is_local_service() && identity_hash_of(&b.name).is_some())
}

/// Rules without those routed to `service_name`, or `None` when there is
/// nothing to remove
#[must_use]
pub fn remove_challenge_rules(
    rules: &[HttpRouteRule],
    service_name: &str,
) -> Option<Vec<HttpRouteRule>> {
    if !rules.iter().any(|r| routes_to(r, service_name)) {
        return None;
    }
    Some(
        rules
            .iter()
            .filter(|r| !routes_to(r, service_name))
            .cloned()
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/.well-known/acme-challenge/tok1";
    const SVC: &str = "cm-acme-http-solver-example-com-0123456789abcdef";

    fn user_rules() -> Vec<HttpRouteRule> {
        serde_json::from_value(json!([
            {
                "matches": [{"path": {"type": "PathPrefix", "value": "/"}}],
                "backendRefs": [{"name": "web", "port": 80}],
                "filters": [{"type": "RequestHeaderModifier", "requestHeaderModifier": {"add": [{"name": "x", "value": "y"}]}}]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_merge_appends_and_is_idempotent() {
        let rules = user_rules();
        let merged = merge_challenge_rule(&rules, PATH, SVC).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0], rules[0]);
        let path = merged[1].matches[0].path.as_ref().unwrap();
        assert_eq!(path.match_type.as_deref(), Some("Exact"));
        assert_eq!(path.value.as_deref(), Some(PATH));
        assert!(merged[1].backend_refs[0].targets_service(SVC));

        assert_eq!(merge_challenge_rule(&merged, PATH, SVC), None);
    }

    #[test]
    fn test_merge_replaces_stale_backend() {
        let mut rules = user_rules();
        rules.push(challenge_rule(PATH, "cm-acme-http-solver-example-com-fedcba9876543210"));

        let merged = merge_challenge_rule(&rules, PATH, SVC).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged[1].backend_refs[0].targets_service(SVC));
    }

    #[test]
    fn test_merge_never_rewrites_user_rules() {
        let shared: Vec<HttpRouteRule> = serde_json::from_value(json!([
            {
                "matches": [
                    {"path": {"type": "Exact", "value": PATH}},
                    {"path": {"type": "PathPrefix", "value": "/api"}}
                ],
                "backendRefs": [{"name": "api", "port": 80}]
            },
            {
                "matches": [{"path": {"type": "Exact", "value": PATH}}],
                "backendRefs": [{"name": "user-responder", "port": 80}]
            }
        ]))
        .unwrap();

        let merged = merge_challenge_rule(&shared, PATH, SVC).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[..2], shared[..]);
        assert!(merged[2].backend_refs[0].targets_service(SVC));

        assert_eq!(merge_challenge_rule(&merged, PATH, SVC), None);
        assert_eq!(remove_challenge_rules(&merged, SVC), Some(shared));
    }

    #[test]
    fn test_remove_restores_user_rules_verbatim() {
        let rules = user_rules();
        let merged = merge_challenge_rule(&rules, PATH, SVC).unwrap();

        let restored = remove_challenge_rules(&merged, SVC).unwrap();
        assert_eq!(
            serde_json::to_value(&restored).unwrap(),
            serde_json::to_value(&rules).unwrap()
        );
        assert_eq!(remove_challenge_rules(&rules, SVC), None);
    }

    #[test]
    fn test_hostname_matching() {
        assert!(hostname_matches("example.com", "EXAMPLE.com"));
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("other.com", "example.com"));
    }
}
