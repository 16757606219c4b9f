//! # Application Spec
//!
//! The `Application` custom resource and its specification.

use serde::{Deserialize, Serialize};

/// Application Custom Resource Definition
///
/// Binds a source (repository + path + environment overlay) to a destination
/// namespace under a sync policy.
///
/// # Example
///
/// ```yaml
/// apiVersion: gitops-reconciler.io/v1alpha1
/// kind: Application
/// metadata:
///   name: demo
///   namespace: gitops-reconciler
/// spec:
///   source:
///     repoUrl: https://github.com/example/deployments.git
///     path: apps/demo
///   destination:
///     namespace: demo
///   environment: dev
///   syncPolicy:
///     mode: Automated
///     selfHeal: true
///     prune: true
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Application",
    group = "gitops-reconciler.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ApplicationStatus",
    shortname = "gapp",
    printcolumn = r#"{"name":"Sync", "type":"string", "jsonPath":".status.syncState"}, {"name":"Environment", "type":"string", "jsonPath":".spec.environment"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Where the manifests come from
    pub source: crate::crd::SourceRef,
    /// Where the manifests are applied
    pub destination: crate::crd::Destination,
    /// Environment overlay rendered on top of the source path (e.g. "dev", "prod")
    pub environment: String,
    /// Sync policy, defaults to manual without prune or self-heal
    #[serde(default)]
    pub sync_policy: crate::crd::SyncPolicy,
    /// Interval between reconciliation ticks
    /// Format: Kubernetes duration string (e.g., "30s", "3m", "1h")
    /// Defaults to the controller-wide `DEFAULT_RECONCILE_INTERVAL`
    #[serde(default)]
    pub reconcile_interval: Option<String>,
    /// How long resolved external secrets are reused before being fetched again
    /// Defaults to the controller-wide `DEFAULT_SECRET_REFRESH_INTERVAL` ("1h")
    #[serde(default)]
    pub secret_refresh_interval: Option<String>,
    /// Suspend reconciliation; in-flight ticks are cancelled
    #[serde(default)]
    pub suspend: bool,
    /// Delete managed objects when the application is removed
    #[serde(default)]
    pub cascade_delete: bool,
}
