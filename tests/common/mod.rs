//! Common test utilities for solver behaviour tests
//!
//! Challenges are written as YAML manifests, the way they appear in a
//! cluster, and every test runs against a fresh `MemoryStore`.

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use acme_http01_controller::crd::Challenge;
use acme_http01_controller::solver::naming::all_solvers_selector;
use acme_http01_controller::solver::{Readiness, Solver, SolverSettings};
use acme_http01_controller::store::{ClusterStore, MemoryStore};
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::ResourceExt;
use serde_json::json;

pub const NAMESPACE: &str = "default";

/// Build a Challenge from a YAML `solver:` block
pub fn challenge(name: &str, dns_name: &str, token: &str, solver_yaml: &str) -> Challenge {
    let solver_yaml = solver_yaml
        .lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n");
    let manifest = format!(
        r#"
apiVersion: acme.cert-manager.io/v1
kind: Challenge
metadata:
  name: {name}
  namespace: {NAMESPACE}
  uid: {name}-uid
spec:
  type: HTTP-01
  dnsName: {dns_name}
  token: {token}
  key: {token}.thumbprint
  solver:
{solver_yaml}
"#
    );
    serde_yaml::from_str(&manifest).expect("challenge fixture should parse")
}

pub fn exclusive_ingress_challenge(name: &str, dns_name: &str, token: &str) -> Challenge {
    challenge(
        name,
        dns_name,
        token,
        "http01:\n  ingress:\n    ingressClassName: nginx",
    )
}

pub fn merge_ingress_challenge(name: &str, dns_name: &str, token: &str, target: &str) -> Challenge {
    challenge(
        name,
        dns_name,
        token,
        &format!("http01:\n  ingress:\n    name: {target}"),
    )
}

/// Mark a challenge resolved, as the ACME client does once the CA answered
pub fn resolved(mut challenge: Challenge) -> Challenge {
    challenge.status = Some(
        serde_json::from_value(json!({"state": "valid", "presented": true}))
            .expect("status fixture should parse"),
    );
    challenge
}

pub fn solver() -> Solver<MemoryStore> {
    Solver::new(MemoryStore::new(), SolverSettings::default())
}

/// Report every solver pod in the namespace as Running and Ready
pub async fn mark_pods_ready(store: &MemoryStore) {
    let pods: Vec<Pod> = store
        .list(Some(NAMESPACE), Some(&all_solvers_selector()))
        .await
        .unwrap();
    for pod in pods {
        store
            .patch::<Pod>(
                NAMESPACE,
                &pod.name_any(),
                &json!({
                    "status": {
                        "phase": "Running",
                        "conditions": [{"type": "Ready", "status": "True"}]
                    }
                }),
            )
            .await
            .unwrap();
    }
}

/// Drive a challenge to readiness: first pass creates the pod, the pod is
/// marked ready, the second pass writes the Service and routing rule
pub async fn solve_until_ready(solver: &Solver<MemoryStore>, challenge: &Challenge) -> Readiness {
    solver.solve(challenge).await.unwrap();
    mark_pods_ready(solver.store()).await;
    solver.solve(challenge).await.unwrap()
}

pub async fn pods(store: &MemoryStore) -> Vec<Pod> {
    store.list(Some(NAMESPACE), None).await.unwrap()
}

pub async fn services(store: &MemoryStore) -> Vec<Service> {
    store.list(Some(NAMESPACE), None).await.unwrap()
}

pub async fn ingresses(store: &MemoryStore) -> Vec<Ingress> {
    store.list(Some(NAMESPACE), None).await.unwrap()
}

pub async fn get_ingress(store: &MemoryStore, name: &str) -> Ingress {
    store
        .get::<Ingress>(NAMESPACE, name)
        .await
        .unwrap()
        .expect("ingress should exist")
}

/// A user-owned Ingress with one `/app` path per host
pub fn user_ingress(name: &str, hosts: &[&str]) -> Ingress {
    let rules: Vec<_> = hosts
        .iter()
        .map(|host| {
            json!({
                "host": host,
                "http": {"paths": [{
                    "path": "/app",
                    "pathType": "Prefix",
                    "backend": {"service": {"name": "web", "port": {"number": 80}}}
                }]}
            })
        })
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {"name": name, "namespace": NAMESPACE},
        "spec": {"ingressClassName": "nginx", "rules": rules}
    }))
    .expect("ingress fixture should parse")
}

pub fn ingress_class(name: &str, default: bool) -> IngressClass {
    let mut class = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "IngressClass",
        "metadata": {"name": name},
        "spec": {"controller": "k8s.io/ingress-nginx"}
    });
    if default {
        class["metadata"]["annotations"] =
            json!({"ingressclass.kubernetes.io/is-default-class": "true"});
    }
    serde_json::from_value(class).expect("ingress class fixture should parse")
}

/// Paths of every rule, as `(host, path, backend service)`
pub fn ingress_paths(ingress: &Ingress) -> Vec<(String, String, String)> {
    ingress
        .spec
        .as_ref()
        .and_then(|s| s.rules.clone())
        .unwrap_or_default()
        .into_iter()
        .flat_map(|rule| {
            let host = rule.host.clone().unwrap_or_default();
            rule.http
                .map(|http| http.paths)
                .unwrap_or_default()
                .into_iter()
                .map(move |p| {
                    (
                        host.clone(),
                        p.path.unwrap_or_default(),
                        p.backend
                            .service
                            .map(|s| s.name)
                            .unwrap_or_default(),
                    )
                })
        })
        .collect()
}
