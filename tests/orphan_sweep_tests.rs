//! Orphan sweep behaviour against the in-memory store

mod common;

use acme_http01_controller::crd::{Challenge, HttpRoute};
use acme_http01_controller::solver::naming::{ChallengeIdentity, NameKind, SOLVER_LABEL};
use acme_http01_controller::solver::OrphanedBackend;
use acme_http01_controller::store::{ClusterStore, MemoryStore};
use common::*;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use serde_json::json;

async fn store_challenge(store: &MemoryStore, challenge: &Challenge) {
    store.create(NAMESPACE, challenge).await.unwrap();
}

fn stray_pod() -> Pod {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "hand-made-solver",
            "namespace": NAMESPACE,
            "labels": {SOLVER_LABEL: "true"}
        },
        "spec": {"containers": [{"name": "acmesolver", "image": "acmesolver:dev"}]}
    }))
    .expect("pod fixture should parse")
}

#[tokio::test]
async fn test_sweep_removes_only_orphaned_resource_sets() {
    let solver = solver();
    let store = solver.store();

    // Still pending in the cluster
    let live = exclusive_ingress_challenge("live", "live.example.com", "tok-live");
    store_challenge(store, &live).await;

    // Never stored, as if deleted without a finalizer
    let gone = exclusive_ingress_challenge("gone", "gone.example.com", "tok-gone");

    // Stored, but already validated by the CA
    let done = exclusive_ingress_challenge("done", "done.example.com", "tok-done");
    store_challenge(store, &resolved(done.clone())).await;

    // Same name, reissued with a new token
    let stale = exclusive_ingress_challenge("swap", "swap.example.com", "tok-old");
    store_challenge(
        store,
        &exclusive_ingress_challenge("swap", "swap.example.com", "tok-new"),
    )
    .await;

    for challenge in [&live, &gone, &done, &stale] {
        solve_until_ready(&solver, challenge).await;
    }
    store.create(NAMESPACE, &stray_pod()).await.unwrap();
    assert_eq!(pods(store).await.len(), 5);

    let report = solver.sweep_orphans(Some(NAMESPACE)).await.unwrap();
    assert_eq!(report.live, 1);
    assert_eq!(report.orphans.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(report.unattributed, 1);
    assert_eq!(report.removed.pods_deleted, 3);
    assert_eq!(report.removed.services_deleted, 3);
    assert_eq!(report.removed.ingresses_deleted, 3);

    let mut remaining: Vec<String> = pods(store).await.iter().map(ResourceExt::name_any).collect();
    remaining.sort();
    let live_pod = pods(store)
        .await
        .into_iter()
        .find(|p| p.annotations().values().any(|v| v == "live"))
        .expect("live challenge keeps its pod");
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&"hand-made-solver".to_string()));
    assert!(remaining.contains(&live_pod.name_any()));
    assert_eq!(services(store).await.len(), 1);
    assert_eq!(ingresses(store).await.len(), 1);

    // Nothing left to sweep
    let again = solver.sweep_orphans(Some(NAMESPACE)).await.unwrap();
    assert_eq!(again.live, 1);
    assert!(again.orphans.is_empty());
}

#[tokio::test]
async fn test_sweep_removes_merged_fragment_of_orphan() {
    let solver = solver();
    let store = solver.store();
    let original = user_ingress("shared", &["example.com"]);
    store.create(NAMESPACE, &original).await.unwrap();

    let challenge = merge_ingress_challenge("c1", "example.com", "tok1", "shared");
    solve_until_ready(&solver, &challenge).await;
    assert_eq!(ingress_paths(&get_ingress(store, "shared").await).len(), 2);

    let report = solver.sweep_orphans(None).await.unwrap();
    assert_eq!(report.orphans, vec![ChallengeIdentity::from_challenge(&challenge).solver_ref()]);
    assert_eq!(report.removed.ingress_fragments_removed, 1);
    assert_eq!(
        get_ingress(store, "shared").await.spec,
        original.spec
    );
}

/// The garbage collector follows the Pod's and Service's owner reference
/// once the Challenge is deleted, leaving only the merged fragment
async fn collect_owned_objects(store: &MemoryStore) {
    for pod in pods(store).await {
        store.delete::<Pod>(NAMESPACE, &pod.name_any()).await.unwrap();
    }
    for service in services(store).await {
        store
            .delete::<Service>(NAMESPACE, &service.name_any())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_sweep_removes_fragments_that_outlived_their_pod_and_service() {
    let solver = solver();
    let store = solver.store();
    let original = user_ingress("shared", &["example.com", "www.example.com"]);
    store.create(NAMESPACE, &original).await.unwrap();

    let deleted = merge_ingress_challenge("c1", "example.com", "tok1", "shared");
    let live = merge_ingress_challenge("c2", "www.example.com", "tok2", "shared");
    store_challenge(store, &live).await;
    solve_until_ready(&solver, &deleted).await;
    solve_until_ready(&solver, &live).await;
    assert_eq!(ingress_paths(&get_ingress(store, "shared").await).len(), 4);

    collect_owned_objects(store).await;

    let report = solver.sweep_orphans(None).await.unwrap();
    let deleted_service = ChallengeIdentity::from_challenge(&deleted).resource_name(NameKind::Service);
    assert_eq!(
        report.orphaned_backends,
        vec![OrphanedBackend {
            namespace: NAMESPACE.to_string(),
            service_name: deleted_service.clone(),
        }]
    );
    assert_eq!(report.removed.ingress_fragments_removed, 1);

    let paths = ingress_paths(&get_ingress(store, "shared").await);
    assert_eq!(paths.len(), 3);
    assert!(!paths.iter().any(|(_, _, service)| *service == deleted_service));
    // The live challenge keeps its path; its next reconcile recreates the pod and Service
    assert!(paths
        .iter()
        .any(|(host, path, _)| host == "www.example.com" && path == "/.well-known/acme-challenge/tok2"));

    let again = solver.sweep_orphans(None).await.unwrap();
    assert!(again.orphaned_backends.is_empty());
}

#[tokio::test]
async fn test_sweep_removes_route_rules_that_outlived_their_pod_and_service() {
    let solver = solver();
    let store = solver.store();
    let original: HttpRoute = serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {"name": "shared-route", "namespace": NAMESPACE},
        "spec": {
            "parentRefs": [{"name": "public-gateway"}],
            "hostnames": ["example.com"],
            "rules": [{
                "matches": [{"path": {"type": "PathPrefix", "value": "/app"}}],
                "backendRefs": [{"name": "web", "port": 80}]
            }]
        }
    }))
    .expect("route fixture should parse");
    store.create(NAMESPACE, &original).await.unwrap();

    let challenge = challenge(
        "c1",
        "example.com",
        "tok1",
        "http01:\n  gatewayHTTPRoute:\n    name: shared-route",
    );
    solve_until_ready(&solver, &challenge).await;
    collect_owned_objects(store).await;

    let report = solver.sweep_orphans(Some(NAMESPACE)).await.unwrap();
    assert_eq!(report.orphaned_backends.len(), 1);
    assert_eq!(report.removed.route_fragments_removed, 1);

    let restored: HttpRoute = store
        .get(NAMESPACE, "shared-route")
        .await
        .unwrap()
        .expect("route should exist");
    assert_eq!(restored.spec, original.spec);
}

#[tokio::test]
async fn test_sweep_is_limited_to_namespace() {
    let solver = solver();
    let challenge = exclusive_ingress_challenge("c1", "example.com", "tok1");
    solve_until_ready(&solver, &challenge).await;

    let report = solver.sweep_orphans(Some("elsewhere")).await.unwrap();
    assert_eq!(report.live, 0);
    assert!(report.orphans.is_empty());
    assert_eq!(pods(solver.store()).await.len(), 1);
}
