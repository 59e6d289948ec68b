//! # Kubernetes Store
//!
//! [`ClusterStore`] backed by the Kubernetes API server.

use crate::store::{label_selector, ClusterStore, Labels, StoreError, StoreObject};
use async_trait::async_trait;
use k8s_openapi::api::networking::v1::IngressClass;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Store that talks to the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        Ok(self.namespaced::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: Option<&str>,
        selector: Option<&Labels>,
    ) -> Result<Vec<K>, StoreError> {
        let api: Api<K> = match namespace {
            Some(ns) => self.namespaced(ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(&label_selector(selector));
        }
        match api.list(&params).await {
            Ok(list) => Ok(list.items),
            // Kind not served (e.g. Gateway API CRDs not installed)
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(
                    "{} is not served by the API server, treating list as empty",
                    K::kind(&())
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K: StoreObject>(&self, namespace: &str, object: &K) -> Result<K, StoreError> {
        let name = object.name_any();
        match self
            .namespaced::<K>(namespace)
            .create(&PostParams::default(), object)
            .await
        {
            Ok(created) => Ok(created),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(StoreError::already_exists::<K>(namespace, &name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn patch<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<K, StoreError> {
        match self
            .namespaced::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
        {
            Ok(patched) => Ok(patched),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(StoreError::conflict::<K>(namespace, name))
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(StoreError::not_found::<K>(namespace, name))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        match self
            .namespaced::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_ingress_classes(&self) -> Result<Vec<IngressClass>, StoreError> {
        let api: Api<IngressClass> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
