//! # Validation
//!
//! Validation of application names and specs before they enter the registry.
//!
//! - `duration`: Kubernetes duration strings (`30s`, `5m`, `1h`, `1d`)
//! - `names`: DNS-1123 labels and source paths

mod duration;
mod names;

pub use duration::{parse_kubernetes_duration, validate_duration_interval};
pub use names::{validate_dns1123_label, validate_source_path};

use crate::config::ControllerConfig;
use crate::crd::{ApplicationSpec, IN_CLUSTER};
use anyhow::{anyhow, Result};

/// Validate an application name and spec
///
/// # Errors
///
/// Returns the first validation failure found.
pub fn validate_application(name: &str, spec: &ApplicationSpec, config: &ControllerConfig) -> Result<()> {
    validate_dns1123_label(name, "name")?;
    validate_dns1123_label(&spec.destination.namespace, "destination.namespace")?;
    if spec.destination.cluster != IN_CLUSTER {
        return Err(anyhow!(
            "destination.cluster '{}' is not supported, only '{IN_CLUSTER}'",
            spec.destination.cluster
        ));
    }
    if spec.source.repo_url.trim().is_empty() {
        return Err(anyhow!("source.repoUrl cannot be empty"));
    }
    validate_source_path(&spec.source.path)?;
    validate_dns1123_label(&spec.environment, "environment")?;

    if let Some(interval) = &spec.reconcile_interval {
        validate_duration_interval(interval, "reconcileInterval", config.min_reconcile_interval_secs)?;
    }
    if let Some(interval) = &spec.secret_refresh_interval {
        validate_duration_interval(interval, "secretRefreshInterval", 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Destination, SourceRef, SyncPolicy};

    fn spec() -> ApplicationSpec {
        ApplicationSpec {
            source: SourceRef {
                repo_url: "https://github.com/example/deployments.git".to_string(),
                path: "apps/demo".to_string(),
                target_revision: None,
            },
            destination: Destination {
                cluster: IN_CLUSTER.to_string(),
                namespace: "demo".to_string(),
            },
            environment: "dev".to_string(),
            sync_policy: SyncPolicy::automated(),
            reconcile_interval: Some("1m".to_string()),
            secret_refresh_interval: None,
            suspend: false,
            cascade_delete: false,
        }
    }

    #[test]
    fn test_valid_application() {
        assert!(validate_application("demo", &spec(), &ControllerConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let config = ControllerConfig::default();
        assert!(validate_application("Demo_App", &spec(), &config).is_err());

        let mut short_interval = spec();
        short_interval.reconcile_interval = Some("5s".to_string());
        assert!(validate_application("demo", &short_interval, &config).is_err());

        let mut escaping = spec();
        escaping.source.path = "../other".to_string();
        assert!(validate_application("demo", &escaping, &config).is_err());

        let mut remote = spec();
        remote.destination.cluster = "prod-east".to_string();
        assert!(validate_application("demo", &remote, &config).is_err());
    }
}
