//! # Status Publishing
//!
//! Mirrors recorded application status onto `Application` custom resources.

use crate::crd::{Application, ApplicationStatus};
use anyhow::Result;
use async_trait::async_trait;
use kube::api::{Api, PatchParams};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Sink for status updates recorded after each tick
#[async_trait]
pub trait StatusPublisher: Send + Sync + fmt::Debug {
    async fn publish(&self, application: &str, status: &ApplicationStatus) -> Result<()>;
}

/// Patches the status subresource of tracked `Application` resources
///
/// Applications created through the control surface have no custom resource
/// and are skipped.
pub struct KubeStatusPublisher {
    client: kube::Client,
    field_manager: String,
    /// Application name to the namespace of its custom resource
    namespaces: RwLock<HashMap<String, String>>,
}

impl fmt::Debug for KubeStatusPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStatusPublisher")
            .field("field_manager", &self.field_manager)
            .finish_non_exhaustive()
    }
}

impl KubeStatusPublisher {
    pub fn new(client: kube::Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Start mirroring `application` to the resource in `namespace`
    pub fn track(&self, application: &str, namespace: &str) {
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(application.to_string(), namespace.to_string());
    }

    pub fn forget(&self, application: &str) {
        self.namespaces
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(application);
    }

    fn namespace_of(&self, application: &str) -> Option<String> {
        self.namespaces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(application)
            .cloned()
    }
}

#[async_trait]
impl StatusPublisher for KubeStatusPublisher {
    async fn publish(&self, application: &str, status: &ApplicationStatus) -> Result<()> {
        let Some(namespace) = self.namespace_of(application) else {
            return Ok(());
        };

        let api: Api<Application> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });

        match api
            .patch_status(
                application,
                &PatchParams::apply(&self.field_manager),
                &kube::api::Patch::Merge(patch),
            )
            .await
        {
            Ok(_) => {
                debug!(application, namespace = %namespace, "status published");
                Ok(())
            }
            // The resource was deleted between the tick and the patch
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
