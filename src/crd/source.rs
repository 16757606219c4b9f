//! # Source and Destination
//!
//! Where an application's manifests come from and where they are applied.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the only supported destination cluster: the one the reconciler runs in
pub const IN_CLUSTER: &str = "in-cluster";

/// Source reference for rendered manifests
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Repository reference
    /// Either an absolute path to a checkout or a repository URL whose checkout
    /// has been fetched into the sources directory
    pub repo_url: String,
    /// Path inside the repository holding the kustomization base
    pub path: String,
    /// Revision the checkout is expected to be at (branch, tag or commit)
    /// Informational: checkouts are fetched outside the reconciler
    #[serde(default)]
    pub target_revision: Option<String>,
}

/// Target cluster and namespace
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Target cluster, only `in-cluster` is supported
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Target namespace; rendered objects without a namespace land here
    pub namespace: String,
}

#[must_use]
pub fn default_cluster() -> String {
    IN_CLUSTER.to_string()
}
