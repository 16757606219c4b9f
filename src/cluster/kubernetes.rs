//! # Kubernetes Cluster Adapter
//!
//! Reads live state as dynamic objects for every managed kind and writes with
//! server-side apply under the reconciler's field manager.

use super::{ApplyError, ClusterClient, ClusterError};
use crate::controller::resource::{LabelSelector, ResourceId, ResourceObject};
use crate::crd::ApplyAction;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DeleteParams, ListParams, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    Client,
};
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

pub struct KubeCluster {
    client: Client,
    field_manager: String,
    kinds: Vec<ApiResource>,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("field_manager", &self.field_manager)
            .field(
                "kinds",
                &self.kinds.iter().map(|ar| ar.kind.as_str()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Parse `group/version/Kind`; the core group is written as an empty group (`/v1/ConfigMap`)
///
/// # Errors
///
/// Returns an error if the entry does not have exactly three segments or if
/// version or kind is empty.
pub fn parse_managed_kind(entry: &str) -> Result<GroupVersionKind> {
    let parts: Vec<&str> = entry.trim().split('/').collect();
    match parts.as_slice() {
        [group, version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(anyhow!(
            "invalid managed kind '{entry}', expected group/version/Kind"
        )),
    }
}

fn gvk_for(object: &ResourceObject) -> GroupVersionKind {
    let (group, version) = object
        .api_version
        .split_once('/')
        .unwrap_or(("", object.api_version.as_str()));
    GroupVersionKind::gvk(group, version, &object.kind)
}

impl KubeCluster {
    /// # Errors
    ///
    /// Returns an error if an entry of `managed_kinds` is malformed.
    pub fn new(client: Client, field_manager: &str, managed_kinds: &[String]) -> Result<Self> {
        let kinds = managed_kinds
            .iter()
            .map(|entry| parse_managed_kind(entry).map(|gvk| ApiResource::from_gvk(&gvk)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            client,
            field_manager: field_manager.to_string(),
            kinds,
        })
    }

    fn resource_for_kind(&self, kind: &str) -> Option<&ApiResource> {
        self.kinds.iter().find(|ar| ar.kind == kind)
    }

    fn to_resource_object(ar: &ApiResource, object: &DynamicObject) -> Option<ResourceObject> {
        let mut value = serde_json::to_value(object).ok()?;
        let map = value.as_object_mut()?;
        map.insert("apiVersion".to_string(), Value::String(ar.api_version.clone()));
        map.insert("kind".to_string(), Value::String(ar.kind.clone()));
        match ResourceObject::from_manifest(value) {
            Ok(resource) => Some(resource),
            Err(e) => {
                warn!(kind = %ar.kind, "skipping unreadable live object: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn read(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceObject>, ClusterError> {
        let span = info_span!("cluster.read", namespace = namespace, selector = %selector.to_query());
        async move {
            let params = ListParams::default().labels(&selector.to_query());
            let mut live = Vec::new();

            for ar in &self.kinds {
                let api: Api<DynamicObject> =
                    Api::namespaced_with(self.client.clone(), namespace, ar);
                match api.list(&params).await {
                    Ok(list) => {
                        debug!(kind = %ar.kind, count = list.items.len(), "listed live objects");
                        live.extend(
                            list.items
                                .iter()
                                .filter_map(|object| Self::to_resource_object(ar, object)),
                        );
                    }
                    // Kind not served by this cluster
                    Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                        debug!(kind = %ar.kind, "kind not served, skipping");
                    }
                    Err(e) => {
                        return Err(ClusterError::Unreachable(format!(
                            "listing {} in {namespace}: {e}",
                            ar.plural
                        )));
                    }
                }
            }

            Ok(live)
        }
        .instrument(span)
        .await
    }

    async fn apply(&self, object: &ResourceObject) -> Result<(), ApplyError> {
        let ar = ApiResource::from_gvk(&gvk_for(object));
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &object.namespace, &ar);
        let params = PatchParams::apply(&self.field_manager).force();
        let manifest = object.to_manifest();

        api.patch(&object.name, &params, &Patch::Apply(&manifest))
            .await
            .map(|_| ())
            .map_err(|e| ApplyError::new(object.id(), ApplyAction::Update, e.to_string()))
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), ApplyError> {
        let ar = self.resource_for_kind(&id.kind).ok_or_else(|| {
            ApplyError::new(
                id.clone(),
                ApplyAction::Delete,
                format!("kind {} is not in the managed kinds list", id.kind),
            )
        })?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &id.namespace, ar);

        match api.delete(&id.name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(()),
            Err(e) => Err(ApplyError::new(id.clone(), ApplyAction::Delete, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_managed_kind() {
        let core = parse_managed_kind("/v1/ConfigMap").unwrap();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
        assert_eq!(core.kind, "ConfigMap");

        let apps = parse_managed_kind("apps/v1/Deployment").unwrap();
        assert_eq!(apps.group, "apps");

        assert!(parse_managed_kind("v1/ConfigMap").is_err());
        assert!(parse_managed_kind("apps//Deployment").is_err());
    }

    #[test]
    fn test_gvk_for_core_and_grouped_api_versions() {
        let secret = ResourceObject::new("v1", "Secret", "demo", "db");
        assert_eq!(gvk_for(&secret).group, "");
        let ingress = ResourceObject::new("networking.k8s.io/v1", "Ingress", "demo", "web");
        let gvk = gvk_for(&ingress);
        assert_eq!(gvk.group, "networking.k8s.io");
        assert_eq!(gvk.version, "v1");
    }

    #[test]
    fn test_api_resource_from_managed_kind() {
        let ar = ApiResource::from_gvk(&parse_managed_kind("apps/v1/Deployment").unwrap());
        assert_eq!(ar.api_version, "apps/v1");
        assert_eq!(ar.plural, "deployments");
    }
}
