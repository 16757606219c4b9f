//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for the control surface, metrics and health probes
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default interval between reconciliation ticks of one application
pub const DEFAULT_RECONCILE_INTERVAL: &str = "3m";

/// Default interval after which resolved external secrets are fetched again
pub const DEFAULT_SECRET_REFRESH_INTERVAL: &str = "1h";

/// Minimum reconcile interval (seconds)
/// Shorter intervals hammer the cluster API and the secret providers
pub const MIN_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Upper bound for any single external call (render, provider lookup, cluster read/write)
pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS: u64 = 30;

/// Number of Sync Runs retained per application
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Directory holding pre-fetched source checkouts, one per repository
pub const DEFAULT_SOURCES_DIR: &str = "/var/lib/gitops-reconciler/sources";

/// Kustomize binary used by the renderer
pub const DEFAULT_KUSTOMIZE_BINARY: &str = "kustomize";

/// Field manager name used for server-side apply
pub const DEFAULT_FIELD_MANAGER: &str = "gitops-reconciler";

/// Kinds read and applied when `MANAGED_KINDS` is not set; rendering any other kind fails the tick
/// Format: `group/version/Kind`, core group is empty
pub const DEFAULT_MANAGED_KINDS: &[&str] = &[
    "/v1/ConfigMap",
    "/v1/Secret",
    "/v1/Service",
    "/v1/ServiceAccount",
    "apps/v1/Deployment",
    "apps/v1/StatefulSet",
    "apps/v1/DaemonSet",
    "batch/v1/CronJob",
    "networking.k8s.io/v1/Ingress",
];

/// Label stamped on every object an application manages; value is the application name
pub const LABEL_APPLICATION: &str = "gitops-reconciler.io/application";

/// Label stamped on Secret objects synthesized from external secret references
pub const LABEL_MANAGED_BY: &str = "gitops-reconciler.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "reconciler";

/// Annotation on the Application custom resource requesting a manual sync
/// Any change of its value triggers one immediate tick
pub const ANNOTATION_SYNC_REQUEST: &str = "gitops-reconciler.io/sync";

/// Kind carrying external secret references in rendered manifests
pub const EXTERNAL_SECRET_KIND: &str = "ExternalSecret";
