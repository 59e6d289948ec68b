//! # Solver Pod
//!
//! Runs the `acmesolver` responder for one challenge. Pod specs are largely
//! immutable, so drift in the fields that decide what is served (image,
//! args, ports) is repaired by deleting the pod; the next invocation creates
//! its replacement.

use crate::crd::{Challenge, PodTemplate};
use crate::observability::metrics;
use crate::solver::naming::{ChallengeIdentity, NameKind};
use crate::solver::{
    SolverError, SolverSettings, SOLVER_CONTAINER_NAME, SOLVER_HEALTH_PATH, SOLVER_PORT,
    SOLVER_PORT_NAME,
};
use crate::store::{ClusterStore, StoreError};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, HTTPGetAction, Pod, PodSecurityContext, PodSpec,
    Probe, ResourceRequirements, SeccompProfile, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What `ensure_pod` found or did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PodState {
    /// Just created; cannot be ready yet
    Created,
    /// Drifted pod deleted; replacement follows on the next invocation
    Replacing,
    Existing { ready: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EnsuredPod {
    pub name: String,
    pub state: PodState,
}

impl EnsuredPod {
    pub fn is_ready(&self) -> bool {
        self.state == PodState::Existing { ready: true }
    }
}

/// Ensure exactly one up-to-date solver pod exists for the challenge
pub(crate) async fn ensure_pod<S: ClusterStore>(
    store: &S,
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
) -> Result<EnsuredPod, SolverError> {
    let namespace = &identity.namespace;
    let desired = build_pod(settings, identity, challenge);
    let name = desired.name_any();

    let mut existing: Vec<Pod> = store
        .list(Some(namespace), Some(&identity.solver_ref().selector()))
        .await?;
    // Newest first; extras can appear after a race or a naming change
    existing.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });

    let mut pods = existing.into_iter();
    let Some(current) = pods.next() else {
        return match store.create(namespace, &desired).await {
            Ok(_) => {
                metrics::increment_solver_resources_created("Pod");
                info!("Created solver pod {}/{}", namespace, name);
                Ok(EnsuredPod {
                    name,
                    state: PodState::Created,
                })
            }
            // A concurrent invocation won the race
            Err(StoreError::AlreadyExists { .. }) => Ok(EnsuredPod {
                name,
                state: PodState::Created,
            }),
            Err(e) => Err(e.into()),
        };
    };

    for extra in pods {
        warn!(
            "Deleting extra solver pod {}/{} (keeping {})",
            namespace,
            extra.name_any(),
            current.name_any()
        );
        if store.delete::<Pod>(namespace, &extra.name_any()).await? {
            metrics::increment_solver_resources_deleted("Pod");
        }
    }

    let current_name = current.name_any();
    if current.metadata.deletion_timestamp.is_some() {
        debug!("Solver pod {}/{} is terminating", namespace, current_name);
        return Ok(EnsuredPod {
            name: current_name,
            state: PodState::Replacing,
        });
    }
    if has_drifted(&current, &desired) {
        info!(
            "Solver pod {}/{} drifted from its desired spec, recreating",
            namespace, current_name
        );
        if store.delete::<Pod>(namespace, &current_name).await? {
            metrics::increment_solver_resources_deleted("Pod");
        }
        return Ok(EnsuredPod {
            name: current_name,
            state: PodState::Replacing,
        });
    }

    Ok(EnsuredPod {
        state: PodState::Existing {
            ready: is_pod_ready(&current),
        },
        name: current_name,
    })
}

/// Ready iff phase is `Running` and the `Ready` condition is `True`
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == "Ready" && c.status == "True")
}

pub(crate) fn build_pod(
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    challenge: &Challenge,
) -> Pod {
    let template = challenge.spec.solver.pod_template();
    let template_meta = template.and_then(|t| t.metadata.as_ref());

    // Solver labels and annotations always win over the template's
    let mut labels = template_meta.map(|m| m.labels.clone()).unwrap_or_default();
    labels.extend(identity.labels());
    let mut annotations = template_meta
        .map(|m| m.annotations.clone())
        .unwrap_or_default();
    annotations.extend(identity.annotations());

    Pod {
        metadata: ObjectMeta {
            name: Some(identity.resource_name(NameKind::Pod)),
            namespace: Some(identity.namespace.clone()),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: challenge.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(pod_spec(settings, identity, &challenge.spec.key, template)),
        status: None,
    }
}

fn pod_spec(
    settings: &SolverSettings,
    identity: &ChallengeIdentity,
    key: &str,
    template: Option<&PodTemplate>,
) -> PodSpec {
    let health_probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some(SOLVER_HEALTH_PATH.to_string()),
            port: IntOrString::Int(SOLVER_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(1),
        period_seconds: Some(5),
        ..Default::default()
    };

    let container = Container {
        name: SOLVER_CONTAINER_NAME.to_string(),
        image: Some(settings.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        args: Some(vec![
            format!("--listen-port={SOLVER_PORT}"),
            format!("--domain={}", identity.dns_name),
            format!("--token={}", identity.token),
            format!("--key={key}"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some(SOLVER_PORT_NAME.to_string()),
            container_port: SOLVER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(settings.cpu_request.clone())),
                ("memory".to_string(), Quantity(settings.memory_request.clone())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity(settings.cpu_limit.clone())),
                ("memory".to_string(), Quantity(settings.memory_limit.clone())),
            ])),
            ..Default::default()
        }),
        readiness_probe: Some(health_probe.clone()),
        liveness_probe: Some(health_probe),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let spec_template = template.and_then(|t| t.spec.as_ref());
    let node_selector = spec_template
        .map(|s| s.node_selector.clone())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            BTreeMap::from([("kubernetes.io/os".to_string(), "linux".to_string())])
        });

    PodSpec {
        containers: vec![container],
        restart_policy: Some("OnFailure".to_string()),
        enable_service_links: Some(false),
        automount_service_account_token: Some(false),
        node_selector: Some(node_selector),
        tolerations: spec_template
            .map(|s| s.tolerations.clone())
            .filter(|t| !t.is_empty()),
        affinity: spec_template.and_then(|s| s.affinity.clone()),
        priority_class_name: spec_template.and_then(|s| s.priority_class_name.clone()),
        service_account_name: spec_template.and_then(|s| s.service_account_name.clone()),
        image_pull_secrets: spec_template
            .map(|s| s.image_pull_secrets.clone())
            .filter(|s| !s.is_empty()),
        security_context: Some(PodSecurityContext {
            run_as_non_root: Some(true),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Compare what the responder serves: image, args and exposed ports
fn has_drifted(actual: &Pod, desired: &Pod) -> bool {
    fn solver_container(pod: &Pod) -> Option<&Container> {
        pod.spec
            .as_ref()?
            .containers
            .iter()
            .find(|c| c.name == SOLVER_CONTAINER_NAME)
    }
    fn ports(container: &Container) -> Vec<(Option<&str>, i32)> {
        container
            .ports
            .iter()
            .flatten()
            .map(|p| (p.name.as_deref(), p.container_port))
            .collect()
    }

    match (solver_container(actual), solver_container(desired)) {
        (Some(a), Some(d)) => a.image != d.image || a.args != d.args || ports(a) != ports(d),
        _ => true,
    }
}
