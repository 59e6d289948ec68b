//! # Solver Service
//!
//! Routes to the solver pod by its label set. Unlike the pod, a drifted
//! Service is patched in place.

use crate::crd::Challenge;
use crate::observability::metrics;
use crate::solver::naming::{ChallengeIdentity, NameKind};
use crate::solver::{SolverError, SOLVER_PORT, SOLVER_PORT_NAME};
use crate::store::{ClusterStore, StoreError};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

const SUPPORTED_SERVICE_TYPES: [&str; 2] = ["ClusterIP", "NodePort"];

/// Validate the configured Service type, defaulting to `ClusterIP`
pub(crate) fn service_type(configured: Option<&str>) -> Result<&'static str, SolverError> {
    match configured {
        None | Some("") => Ok("ClusterIP"),
        Some(requested) => SUPPORTED_SERVICE_TYPES
            .into_iter()
            .find(|t| *t == requested)
            .ok_or_else(|| {
                SolverError::configuration(format!(
                    "serviceType {requested:?} is not supported, expected one of {}",
                    SUPPORTED_SERVICE_TYPES.join(", ")
                ))
            }),
    }
}

/// Ensure the solver Service exists and selects the solver pod.
/// Returns the Service name.
pub(crate) async fn ensure_service<S: ClusterStore>(
    store: &S,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    service_type: &str,
) -> Result<String, SolverError> {
    let namespace = &identity.namespace;
    let desired = build_service(identity, challenge, service_type);
    let name = desired.name_any();

    let existing: Vec<Service> = store
        .list(Some(namespace), Some(&identity.solver_ref().selector()))
        .await?;

    let mut current = None;
    for service in existing {
        if service.name_any() == name {
            current = Some(service);
        } else {
            warn!(
                "Deleting extra solver service {}/{}",
                namespace,
                service.name_any()
            );
            if store.delete::<Service>(namespace, &service.name_any()).await? {
                metrics::increment_solver_resources_deleted("Service");
            }
        }
    }

    let Some(current) = current else {
        match store.create(namespace, &desired).await {
            Ok(_) => {
                metrics::increment_solver_resources_created("Service");
                info!("Created solver service {}/{}", namespace, name);
            }
            Err(StoreError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(name);
    };

    if let Some(patch) = drift_patch(&current, &desired) {
        info!("Solver service {}/{} drifted, patching", namespace, name);
        store.patch::<Service>(namespace, &name, &patch).await?;
    }
    Ok(name)
}

pub(crate) fn build_service(
    identity: &ChallengeIdentity,
    challenge: &Challenge,
    service_type: &str,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(identity.resource_name(NameKind::Service)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(identity.labels()),
            annotations: Some(identity.annotations()),
            owner_references: challenge.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(identity.labels()),
            ports: Some(vec![ServicePort {
                name: Some(SOLVER_PORT_NAME.to_string()),
                port: SOLVER_PORT,
                target_port: Some(IntOrString::Int(SOLVER_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Merge patch restoring type, selector and ports, `None` when in sync
fn drift_patch(actual: &Service, desired: &Service) -> Option<Value> {
    let desired = desired.spec.as_ref()?;
    let empty = ServiceSpec::default();
    let actual = actual.spec.as_ref().unwrap_or(&empty);

    let ports = |spec: &ServiceSpec| -> Vec<(i32, Option<IntOrString>)> {
        spec.ports
            .iter()
            .flatten()
            .map(|p| (p.port, p.target_port.clone()))
            .collect()
    };
    // An unset type is ClusterIP
    let service_type = |spec: &ServiceSpec| spec.type_.as_deref().unwrap_or("ClusterIP").to_string();

    if actual.selector == desired.selector
        && ports(actual) == ports(desired)
        && service_type(actual) == service_type(desired)
    {
        return None;
    }

    // Merge patches only add keys to maps; stale selector keys are nulled
    let mut selector = Map::new();
    for key in actual.selector.iter().flatten().map(|(k, _)| k) {
        selector.insert(key.clone(), Value::Null);
    }
    for (key, value) in desired.selector.iter().flatten() {
        selector.insert(key.clone(), json!(value));
    }

    Some(json!({
        "spec": {
            "type": desired.type_,
            "selector": selector,
            "ports": desired.ports,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ChallengeSpec;
    use crate::store::MemoryStore;

    fn challenge() -> Challenge {
        let spec: ChallengeSpec = serde_json::from_value(json!({
            "type": "HTTP-01",
            "dnsName": "example.com",
            "token": "tok1",
            "key": "tok1.thumb",
            "solver": {"http01": {"ingress": {}}}
        }))
        .unwrap();
        let mut challenge = Challenge::new("c1", spec);
        challenge.metadata.namespace = Some("default".to_string());
        challenge
    }

    #[test]
    fn test_service_type_validation() {
        assert_eq!(service_type(None).unwrap(), "ClusterIP");
        assert_eq!(service_type(Some("NodePort")).unwrap(), "NodePort");

        let err = service_type(Some("LoadBalancer")).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("\"LoadBalancer\""));
    }

    #[tokio::test]
    async fn test_ensure_service_creates_once() {
        let store = MemoryStore::new();
        let challenge = challenge();
        let identity = ChallengeIdentity::from_challenge(&challenge);

        let name = ensure_service(&store, &identity, &challenge, "ClusterIP")
            .await
            .unwrap();
        let writes = store.write_count();
        let again = ensure_service(&store, &identity, &challenge, "ClusterIP")
            .await
            .unwrap();

        assert_eq!(name, again);
        assert!(name.len() <= 63);
        assert_eq!(store.write_count(), writes);

        let service: Service = store.get("default", &name).await.unwrap().unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, Some(identity.labels()));
        assert_eq!(spec.ports.unwrap()[0].port, 8089);
    }

    #[tokio::test]
    async fn test_drifted_service_is_patched() {
        let store = MemoryStore::new();
        let challenge = challenge();
        let identity = ChallengeIdentity::from_challenge(&challenge);

        let name = ensure_service(&store, &identity, &challenge, "ClusterIP")
            .await
            .unwrap();
        store
            .patch::<Service>(
                "default",
                &name,
                &json!({"spec": {"selector": {"app": "something-else"}}}),
            )
            .await
            .unwrap();

        ensure_service(&store, &identity, &challenge, "NodePort")
            .await
            .unwrap();

        let service: Service = store.get("default", &name).await.unwrap().unwrap();
        let spec = service.spec.unwrap();
        assert_eq!(spec.selector, Some(identity.labels()));
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
    }
}
