//! # Cluster State Store
//!
//! Every read and write the solver performs goes through [`ClusterStore`].
//! The labelled objects in the store are the solver's only persisted state.
//!
//! Implementations:
//! - [`KubeStore`]: the Kubernetes API via kube-rs
//! - [`MemoryStore`]: an in-process store with the same optimistic
//!   concurrency semantics, used by tests

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::IngressClass;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use thiserror::Error;

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Label set used both to stamp objects and to select them
pub type Labels = BTreeMap<String, String>;

/// Errors returned by a [`ClusterStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    /// Optimistic concurrency failure: the object changed since it was read
    #[error("conflict writing {kind} {namespace}/{name}: the object has been modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn not_found<K: StoreObject>(namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn conflict<K: StoreObject>(namespace: &str, name: &str) -> Self {
        StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists<K: StoreObject>(namespace: &str, name: &str) -> Self {
        StoreError::AlreadyExists {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// Namespaced resource kinds the store can hold
pub trait StoreObject:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Read/write access to cluster state
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Get an object, `None` if it does not exist
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str)
        -> Result<Option<K>, StoreError>;

    /// List objects in one namespace (or all namespaces), optionally
    /// restricted to objects carrying every label in `selector`
    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: Option<&Labels>,
    ) -> Result<Vec<K>, StoreError>;

    /// Create an object; `AlreadyExists` if the name is taken
    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError>;

    /// Apply a JSON merge patch. A `metadata.resourceVersion` in the patch is a
    /// precondition and yields `Conflict` when stale.
    async fn patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError>;

    /// Delete an object. Returns false if it was already gone.
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<bool, StoreError>;

    /// List the cluster's IngressClasses
    async fn list_ingress_classes(&self) -> Result<Vec<IngressClass>, StoreError>;
}

/// Render a label set as a Kubernetes label selector string
#[must_use]
pub fn label_selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when `labels` carries every pair in `selector`
#[must_use]
pub fn matches_selector(labels: Option<&Labels>, selector: &Labels) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_label_selector_is_sorted_and_comma_separated() {
        let selector = labels(&[("b", "2"), ("a", "1")]);
        assert_eq!(label_selector(&selector), "a=1,b=2");
    }

    #[test]
    fn test_matches_selector() {
        let object = labels(&[("a", "1"), ("b", "2"), ("c", "3")]);
        assert!(matches_selector(Some(&object), &labels(&[("a", "1"), ("c", "3")])));
        assert!(!matches_selector(Some(&object), &labels(&[("a", "2")])));
        assert!(!matches_selector(None, &labels(&[("a", "1")])));
        assert!(matches_selector(None, &Labels::new()));
    }
}
