//! # Cluster State Reader
//!
//! Snapshots the live objects an application owns. The ownership label is
//! always part of the selector, and results are filtered again client-side so
//! that objects of other applications are never adopted.

use crate::cluster::{ClusterClient, ClusterError};
use crate::constants::LABEL_APPLICATION;
use crate::controller::resource::{LabelSelector, ResourceObject};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ClusterStateReader {
    cluster: Arc<dyn ClusterClient>,
    timeout: Duration,
}

impl ClusterStateReader {
    pub fn new(cluster: Arc<dyn ClusterClient>, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    /// Selector matching every object owned by `application`
    #[must_use]
    pub fn ownership_selector(application: &str) -> LabelSelector {
        LabelSelector::new().with(LABEL_APPLICATION, application)
    }

    /// Live objects in `namespace` owned by `application`
    ///
    /// # Errors
    ///
    /// Any port failure, including a timeout, is reported as `Unreachable`.
    pub async fn read(
        &self,
        application: &str,
        namespace: &str,
    ) -> Result<Vec<ResourceObject>, ClusterError> {
        let selector = Self::ownership_selector(application);
        let live = tokio::time::timeout(self.timeout, self.cluster.read(namespace, &selector))
            .await
            .map_err(|_| {
                ClusterError::Unreachable(format!(
                    "read of {namespace} timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let owned: Vec<ResourceObject> = live
            .into_iter()
            .filter(|object| object.namespace == namespace && selector.matches(&object.labels))
            .collect();
        debug!(application, namespace, count = owned.len(), "read live state");
        Ok(owned)
    }
}
