//! # Gateway API Types
//!
//! `HTTPRoute` from `gateway.networking.k8s.io/v1`, modelled as far as the
//! solver needs. Fields the solver does not understand are kept in the
//! flattened `extra` maps so that rewriting a user's rule list never drops
//! filters, timeouts or header matches.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTPRoute spec
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    root = "HttpRoute",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parent gateway references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parent_refs: Vec<ParentReference>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
}

/// Reference to a parent Gateway
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// HTTPRoute rule
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_refs: Vec<HttpBackendRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// HTTPRoute match
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Path match (`Exact`, `PathPrefix`, `RegularExpression`)
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub match_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Backend reference of an HTTPRoute rule
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpBackendRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HttpBackendRef {
    /// True when this backend points at the named Service in the route's namespace
    #[must_use]
    pub fn targets_service(&self, service_name: &str) -> bool {
        self.name == service_name && self.is_local_service()
    }

    /// True when this backend is a core Service in the route's namespace
    #[must_use]
    pub fn is_local_service(&self) -> bool {
        self.namespace.is_none()
            && self.kind.as_deref().is_none_or(|k| k == "Service")
            && self.group.as_deref().is_none_or(str::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_route_resource_identity() {
        assert_eq!(HttpRoute::kind(&()), "HTTPRoute");
        assert_eq!(HttpRoute::group(&()), "gateway.networking.k8s.io");
        assert_eq!(HttpRoute::api_version(&()), "gateway.networking.k8s.io/v1");
        assert_eq!(HttpRoute::plural(&()), "httproutes");

        let route = HttpRoute::new("shared-route", HttpRouteSpec::default());
        assert_eq!(route.metadata.name.as_deref(), Some("shared-route"));
    }

    #[test]
    fn test_unmodelled_rule_fields_survive_round_trip() {
        let raw = serde_json::json!({
            "matches": [{"path": {"type": "PathPrefix", "value": "/"}, "headers": [{"name": "x", "value": "y"}]}],
            "backendRefs": [{"name": "app", "port": 80}],
            "filters": [{"type": "RequestHeaderModifier"}],
            "timeouts": {"request": "10s"}
        });

        let rule: HttpRouteRule = serde_json::from_value(raw.clone()).unwrap();
        assert!(rule.extra.contains_key("filters"));
        assert!(rule.matches[0].extra.contains_key("headers"));
        assert_eq!(serde_json::to_value(&rule).unwrap(), raw);
    }

    #[test]
    fn test_targets_service() {
        let backend = HttpBackendRef {
            name: "svc".to_string(),
            port: Some(8089),
            ..Default::default()
        };
        assert!(backend.targets_service("svc"));
        assert!(!backend.targets_service("other"));

        let cross_namespace = HttpBackendRef {
            namespace: Some("elsewhere".to_string()),
            ..backend
        };
        assert!(!cross_namespace.targets_service("svc"));
    }
}
