//! # In-Memory Store
//!
//! A [`ClusterStore`] kept in process memory. It mirrors the API server
//! behaviour the solver depends on:
//!
//! - `resourceVersion` bumps on every write, `uid` and `creationTimestamp` on create
//! - JSON merge patch semantics (RFC 7386)
//! - a `metadata.resourceVersion` in a patch is a precondition (409 on mismatch)
//! - label selection on list
//!
//! Every call yields to the scheduler first, so concurrent solvers interleave
//! between their reads and writes the way they would against a real cluster.

use crate::store::{matches_selector, ClusterStore, Labels, StoreError, StoreObject};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use k8s_openapi::api::networking::v1::IngressClass;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Objects are keyed by (kind, namespace, name)
type ObjectKey = (String, String, String);

/// Creation timestamps start here and advance one second per write
const EPOCH_BASE_SECS: i64 = 1_700_000_000;

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<ObjectKey, Value>,
    ingress_classes: Vec<IngressClass>,
    revision: u64,
    pending_conflicts: usize,
    writes: u64,
}

/// In-process cluster store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with IngressClasses
    #[must_use]
    pub fn with_ingress_classes(classes: Vec<IngressClass>) -> Self {
        let store = Self::default();
        store.set_ingress_classes(classes);
        store
    }

    pub fn set_ingress_classes(&self, classes: Vec<IngressClass>) {
        self.lock().ingress_classes = classes;
    }

    /// Make the next `count` preconditioned patches fail with `Conflict`,
    /// as if another writer got there first
    pub fn inject_conflicts(&self, count: usize) {
        self.lock().pending_conflicts = count;
    }

    /// Number of successful writes (create, patch, delete) so far
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn key<K: StoreObject>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn resource_version(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn labels_of(value: &Value) -> Option<Labels> {
    value
        .pointer("/metadata/labels")
        .and_then(|l| serde_json::from_value(l.clone()).ok())
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        tokio::task::yield_now().await;
        let value = self.lock().objects.get(&key::<K>(namespace, name)).cloned();
        match value {
            Some(v) => Ok(Some(serde_json::from_value(v)?)),
            None => Ok(None),
        }
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: Option<&Labels>,
    ) -> Result<Vec<K>, StoreError> {
        tokio::task::yield_now().await;
        let kind = K::kind(&()).into_owned();
        let matching: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.is_none_or(|n| n == ns.as_str()))
            .filter(|(_, v)| selector.is_none_or(|s| matches_selector(labels_of(v).as_ref(), s)))
            .map(|(_, v)| v.clone())
            .collect();
        matching
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        tokio::task::yield_now().await;
        let name = object.meta().name.clone().unwrap_or_default();
        let mut value = serde_json::to_value(object)?;

        let mut state = self.lock();
        let object_key = key::<K>(namespace, &name);
        if state.objects.contains_key(&object_key) {
            return Err(StoreError::already_exists::<K>(namespace, &name));
        }

        state.revision += 1;
        let revision = state.revision;
        value["metadata"]["namespace"] = json!(namespace);
        value["metadata"]["resourceVersion"] = json!(revision.to_string());
        value["metadata"]["uid"] = json!(format!("uid-{revision}"));
        let created_at = i64::try_from(revision)
            .ok()
            .and_then(|r| DateTime::from_timestamp(EPOCH_BASE_SECS + r, 0));
        if let Some(created_at) = created_at {
            value["metadata"]["creationTimestamp"] =
                json!(created_at.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        let created: K = serde_json::from_value(value.clone())?;
        state.objects.insert(object_key, value);
        state.writes += 1;
        Ok(created)
    }

    async fn patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        let object_key = key::<K>(namespace, name);
        let Some(mut updated) = state.objects.get(&object_key).cloned() else {
            return Err(StoreError::not_found::<K>(namespace, name));
        };

        if let Some(expected) = resource_version(patch) {
            if state.pending_conflicts > 0 {
                state.pending_conflicts -= 1;
                return Err(StoreError::conflict::<K>(namespace, name));
            }
            if resource_version(&updated) != Some(expected) {
                return Err(StoreError::conflict::<K>(namespace, name));
            }
        }

        json_patch::merge(&mut updated, patch);
        state.revision += 1;
        updated["metadata"]["name"] = json!(name);
        updated["metadata"]["namespace"] = json!(namespace);
        updated["metadata"]["resourceVersion"] = json!(state.revision.to_string());

        let patched: K = serde_json::from_value(updated.clone())?;
        state.objects.insert(object_key, updated);
        state.writes += 1;
        Ok(patched)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        tokio::task::yield_now().await;
        let mut state = self.lock();
        let removed = state.objects.remove(&key::<K>(namespace, name)).is_some();
        if removed {
            state.writes += 1;
        }
        Ok(removed)
    }

    async fn list_ingress_classes(&self) -> Result<Vec<IngressClass>, StoreError> {
        tokio::task::yield_now().await;
        Ok(self.lock().ingress_classes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_server_fields() {
        let store = MemoryStore::new();
        let created = store
            .create("ns", &config_map("a", &[]))
            .await
            .unwrap();

        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let duplicate = store.create("ns", &config_map("a", &[])).await;
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_list_filters_by_namespace_and_selector() {
        let store = MemoryStore::new();
        store.create("ns", &config_map("a", &[("app", "x")])).await.unwrap();
        store.create("ns", &config_map("b", &[("app", "y")])).await.unwrap();
        store.create("other", &config_map("c", &[("app", "x")])).await.unwrap();

        let selector: Labels = [("app".to_string(), "x".to_string())].into();
        let in_ns: Vec<ConfigMap> = store.list(Some("ns"), Some(&selector)).await.unwrap();
        assert_eq!(in_ns.len(), 1);
        assert_eq!(in_ns[0].metadata.name.as_deref(), Some("a"));

        let everywhere: Vec<ConfigMap> = store.list(None, Some(&selector)).await.unwrap();
        assert_eq!(everywhere.len(), 2);
    }

    #[tokio::test]
    async fn test_patch_with_stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        store.create("ns", &config_map("a", &[])).await.unwrap();

        let patched: ConfigMap = store
            .patch(
                "ns",
                "a",
                &json!({"metadata": {"resourceVersion": "1"}, "data": {"k": "v"}}),
            )
            .await
            .unwrap();
        assert_eq!(patched.metadata.resource_version.as_deref(), Some("2"));
        assert_eq!(patched.data.unwrap().get("k").map(String::as_str), Some("v"));

        let stale = store
            .patch::<ConfigMap>(
                "ns",
                "a",
                &json!({"metadata": {"resourceVersion": "1"}, "data": {"k": "w"}}),
            )
            .await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_injected_conflicts_only_hit_preconditioned_patches() {
        let store = MemoryStore::new();
        store.create("ns", &config_map("a", &[])).await.unwrap();
        store.inject_conflicts(1);

        store
            .patch::<ConfigMap>("ns", "a", &json!({"data": {"k": "v"}}))
            .await
            .unwrap();
        let conflicted = store
            .patch::<ConfigMap>("ns", "a", &json!({"metadata": {"resourceVersion": "2"}}))
            .await;
        assert!(matches!(conflicted, Err(StoreError::Conflict { .. })));
        store
            .patch::<ConfigMap>("ns", "a", &json!({"metadata": {"resourceVersion": "2"}}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_reports_whether_object_existed() {
        let store = MemoryStore::new();
        store.create("ns", &config_map("a", &[])).await.unwrap();

        assert!(store.delete::<ConfigMap>("ns", "a").await.unwrap());
        assert!(!store.delete::<ConfigMap>("ns", "a").await.unwrap());
        assert_eq!(store.write_count(), 2);
    }
}
