//! # Solver Configuration
//!
//! HTTP-01 solver configuration as carried on a `Challenge`. Exactly one of
//! `ingress` or `gatewayHTTPRoute` must be set; the orchestrator checks that
//! before touching the cluster.

use crate::crd::gateway::ParentReference;
use k8s_openapi::api::core::v1::{Affinity, LocalObjectReference, Toleration};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Solver selected for a challenge
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallengeSolver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http01: Option<AcmeChallengeSolverHttp01>,
    /// DNS-01 configuration, carried through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns01: Option<serde_json::Value>,
}

/// HTTP-01 solver variants
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallengeSolverHttp01 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<Http01IngressSolver>,
    #[serde(
        default,
        rename = "gatewayHTTPRoute",
        skip_serializing_if = "Option::is_none"
    )]
    pub gateway_http_route: Option<Http01GatewayHttpRouteSolver>,
}

/// Ingress based HTTP-01 solver
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Http01IngressSolver {
    /// Legacy ingress class, written as the `kubernetes.io/ingress.class` annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    /// IngressClass name for solver-created Ingresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Existing Ingress to merge the challenge path into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// When `name` is unset, merge into an existing Ingress that already
    /// serves the challenge's DNS name
    #[serde(default)]
    pub merge_by_host: bool,
    /// Service type for the solver Service (`ClusterIP` or `NodePort`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplate>,
    /// Labels and annotations for solver-created Ingresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_template: Option<ObjectMetaTemplate>,
}

/// Gateway API based HTTP-01 solver
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Http01GatewayHttpRouteSolver {
    /// Gateways the solver HTTPRoute attaches to
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Extra labels for solver-created HTTPRoutes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Existing HTTPRoute to merge the challenge rule into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplate>,
}

/// Pass-through pod configuration for the solver pod
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMetaTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpecTemplate>,
}

/// Labels and annotations merged into a solver-created object
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetaTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Scheduling and identity settings for the solver pod
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpecTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl AcmeChallengeSolver {
    /// Pod template of whichever HTTP-01 variant is configured
    #[must_use]
    pub fn pod_template(&self) -> Option<&PodTemplate> {
        let http01 = self.http01.as_ref()?;
        http01
            .ingress
            .as_ref()
            .and_then(|i| i.pod_template.as_ref())
            .or_else(|| {
                http01
                    .gateway_http_route
                    .as_ref()
                    .and_then(|g| g.pod_template.as_ref())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_solver_uses_upstream_field_name() {
        let solver: AcmeChallengeSolver = serde_json::from_value(serde_json::json!({
            "http01": {
                "gatewayHTTPRoute": {
                    "parentRefs": [{"name": "public", "namespace": "gateways"}],
                    "labels": {"team": "edge"}
                }
            }
        }))
        .unwrap();

        let gateway = solver.http01.unwrap().gateway_http_route.unwrap();
        assert_eq!(gateway.parent_refs.len(), 1);
        assert_eq!(gateway.parent_refs[0].name, "public");
        assert_eq!(gateway.labels.get("team").map(String::as_str), Some("edge"));
    }

    #[test]
    fn test_pod_template_is_found_on_either_variant() {
        let template = PodTemplate {
            spec: Some(PodSpecTemplate {
                service_account_name: Some("solver".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let solver = AcmeChallengeSolver {
            http01: Some(AcmeChallengeSolverHttp01 {
                gateway_http_route: Some(Http01GatewayHttpRouteSolver {
                    pod_template: Some(template.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            dns01: None,
        };

        assert_eq!(solver.pod_template(), Some(&template));
    }
}
