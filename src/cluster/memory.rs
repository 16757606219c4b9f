//! In-memory cluster with fault injection.
//!
//! `apply` merges the desired fields into the stored object the same way the
//! API server treats a server-side apply from a single field manager: fields
//! the manager never set are preserved, a `null` removes the field.

use super::{ApplyError, ClusterClient, ClusterError};
use crate::controller::diff::{compare_objects, strip_nulls};
use crate::controller::resource::{LabelSelector, ResourceId, ResourceObject};
use crate::crd::ApplyAction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

#[derive(Debug, Default)]
pub struct InMemoryCluster {
    objects: RwLock<BTreeMap<ResourceId, ResourceObject>>,
    unreachable: AtomicBool,
    failing: RwLock<BTreeSet<ResourceId>>,
    mutations: Mutex<Vec<(ApplyAction, ResourceId)>>,
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `object` as-is, bypassing the reconciler (out-of-band change)
    pub fn insert(&self, object: ResourceObject) {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(object.id(), object);
    }

    /// Remove an object out-of-band
    pub fn remove(&self, id: &ResourceId) -> Option<ResourceObject> {
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<ResourceObject> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ResourceId> {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Edit a stored object in place, out-of-band
    pub fn modify<F>(&self, id: &ResourceId, edit: F) -> bool
    where
        F: FnOnce(&mut ResourceObject),
    {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        match objects.get_mut(id) {
            Some(object) => {
                edit(object);
                true
            }
            None => false,
        }
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make every apply/delete of `id` fail until cleared
    pub fn fail_mutations_of(&self, id: ResourceId) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    pub fn clear_failures(&self) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Every successful mutation in call order
    #[must_use]
    pub fn mutations(&self) -> Vec<(ApplyAction, ResourceId)> {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_mutations(&self) {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn is_failing(&self, id: &ResourceId) -> bool {
        self.failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn record(&self, action: ApplyAction, id: ResourceId) {
        self.mutations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((action, id));
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn read(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceObject>, ClusterError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|object| object.namespace == namespace && selector.matches(&object.labels))
            .cloned()
            .collect())
    }

    async fn apply(&self, object: &ResourceObject) -> Result<(), ApplyError> {
        let id = object.id();
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let action = if objects.contains_key(&id) {
            ApplyAction::Update
        } else {
            ApplyAction::Create
        };
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApplyError::new(id, action, "connection refused"));
        }
        if self.is_failing(&id) {
            return Err(ApplyError::new(id, action, "admission webhook denied the request"));
        }

        match objects.get_mut(&id) {
            Some(live) => {
                compare_objects(object, live).apply_to(live);
                live.api_version.clone_from(&object.api_version);
            }
            None => {
                let mut created = object.clone();
                if let Value::Object(content) = strip_nulls(&Value::Object(object.content.clone())) {
                    created.content = content;
                }
                objects.insert(id.clone(), created);
            }
        }
        drop(objects);
        self.record(action, id);
        Ok(())
    }

    async fn delete(&self, id: &ResourceId) -> Result<(), ApplyError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApplyError::new(id.clone(), ApplyAction::Delete, "connection refused"));
        }
        if self.is_failing(id) {
            return Err(ApplyError::new(
                id.clone(),
                ApplyAction::Delete,
                "object is protected by a finalizer",
            ));
        }
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        self.record(ApplyAction::Delete, id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_apply_preserves_fields_set_by_others() {
        let cluster = InMemoryCluster::new();
        let mut live = ResourceObject::new("apps/v1", "Deployment", "demo", "web")
            .with_field("spec", json!({"replicas": 1, "paused": false}));
        live.labels.insert("owner".to_string(), "team".to_string());
        cluster.insert(live.clone());

        let desired = ResourceObject::new("apps/v1", "Deployment", "demo", "web")
            .with_field("spec", json!({"replicas": 3}));
        cluster.apply(&desired).await.unwrap();

        let stored = cluster.get(&desired.id()).unwrap();
        assert_eq!(stored.field(&["spec"]), Some(&json!({"replicas": 3, "paused": false})));
        assert_eq!(stored.label("owner"), Some("team"));
        assert_eq!(cluster.mutations(), vec![(ApplyAction::Update, desired.id())]);
    }

    #[tokio::test]
    async fn test_read_filters_namespace_and_selector() {
        let cluster = InMemoryCluster::new();
        cluster.insert(ResourceObject::new("v1", "ConfigMap", "demo", "a").with_label("app", "demo"));
        cluster.insert(ResourceObject::new("v1", "ConfigMap", "other", "b").with_label("app", "demo"));
        cluster.insert(ResourceObject::new("v1", "ConfigMap", "demo", "c"));

        let live = cluster
            .read("demo", &LabelSelector::new().with("app", "demo"))
            .await
            .unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name, "a");
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let cluster = InMemoryCluster::new();
        let object = ResourceObject::new("v1", "ConfigMap", "demo", "a");
        cluster.fail_mutations_of(object.id());
        let err = cluster.apply(&object).await.unwrap_err();
        assert_eq!(err.action, ApplyAction::Create);
        cluster.clear_failures();
        cluster.apply(&object).await.unwrap();

        cluster.set_unreachable(true);
        assert!(cluster.read("demo", &LabelSelector::new()).await.is_err());
    }
}
