//! # Cluster Port
//!
//! The reconciler reads and mutates the target cluster only through
//! [`ClusterClient`].
//!
//! - `kubernetes`: Kubernetes API server via dynamic objects and server-side apply
//! - `memory`: in-memory cluster used by tests and dry runs

use crate::controller::resource::{LabelSelector, ResourceId, ResourceObject};
use crate::crd::ApplyAction;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeCluster;
pub use memory::InMemoryCluster;

/// Failure reading live state; aborts the tick
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("cluster unreachable: {0}")]
    Unreachable(String),
}

/// Failure of a single apply or delete call; isolated to that object
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{action} {id} failed: {message}")]
pub struct ApplyError {
    pub id: ResourceId,
    pub action: ApplyAction,
    pub message: String,
}

impl ApplyError {
    pub fn new(id: ResourceId, action: ApplyAction, message: impl Into<String>) -> Self {
        Self {
            id,
            action,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync + fmt::Debug {
    /// Live objects in `namespace` whose labels match `selector`
    async fn read(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ResourceObject>, ClusterError>;

    /// Create or update `object` so that its desired fields match
    async fn apply(&self, object: &ResourceObject) -> Result<(), ApplyError>;

    /// Delete the object; deleting an absent object succeeds
    async fn delete(&self, id: &ResourceId) -> Result<(), ApplyError>;
}
