//! # Reconciler Types
//!
//! The shared reconciler context and its settings.

use crate::cluster::{ClusterClient, ClusterError};
use crate::config::ControllerConfig;
use crate::controller::materializer::{InvalidExternalSecret, SecretMaterializer};
use crate::controller::reader::ClusterStateReader;
use crate::controller::reconciler::status::StatusPublisher;
use crate::controller::reconciler::validation::parse_kubernetes_duration;
use crate::controller::render::{RenderError, Renderer};
use crate::controller::store::StateStore;
use crate::crd::ApplicationSpec;
use crate::provider::ProviderRegistry;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Process-wide reconciler settings, resolved once from [`ControllerConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// Upper bound for every renderer, provider and cluster call
    pub call_timeout: Duration,
    pub history_limit: usize,
    pub default_reconcile_interval: Duration,
    pub default_secret_refresh_interval: Duration,
    pub min_reconcile_interval: Duration,
    /// Kinds the cluster reader lists; rendering any other kind fails the tick
    pub managed_kinds: BTreeSet<String>,
}

/// Kind names of `group/version/Kind` entries
fn kind_names<'a>(entries: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    entries
        .into_iter()
        .filter_map(|entry| entry.trim().rsplit('/').next())
        .filter(|kind| !kind.is_empty())
        .map(str::to_string)
        .collect()
}

impl ReconcilerSettings {
    /// Resolve settings from the controller configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a default interval is not a valid duration.
    pub fn from_config(config: &ControllerConfig) -> Result<Self> {
        Ok(Self {
            call_timeout: config.external_call_timeout(),
            history_limit: config.history_limit.max(1),
            default_reconcile_interval: parse_kubernetes_duration(&config.default_reconcile_interval)
                .context("Invalid DEFAULT_RECONCILE_INTERVAL")?,
            default_secret_refresh_interval: parse_kubernetes_duration(
                &config.default_secret_refresh_interval,
            )
            .context("Invalid DEFAULT_SECRET_REFRESH_INTERVAL")?,
            min_reconcile_interval: config.min_reconcile_interval(),
            managed_kinds: kind_names(config.managed_kinds.iter().map(String::as_str)),
        })
    }
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(crate::constants::DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS),
            history_limit: crate::constants::DEFAULT_HISTORY_LIMIT,
            default_reconcile_interval: Duration::from_secs(180),
            default_secret_refresh_interval: Duration::from_secs(3600),
            min_reconcile_interval: Duration::from_secs(
                crate::constants::MIN_RECONCILE_INTERVAL_SECS,
            ),
            managed_kinds: kind_names(crate::constants::DEFAULT_MANAGED_KINDS.iter().copied()),
        }
    }
}

/// Reasons a tick stops before reaching the apply step
#[derive(Debug, Error)]
pub enum TickError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("invalid external secret: {0}")]
    InvalidSecret(#[from] InvalidExternalSecret),
    #[error("{0}")]
    Cluster(#[from] ClusterError),
    #[error("tick cancelled")]
    Cancelled,
}

/// Reconciler context shared by every application loop
pub struct Reconciler {
    pub renderer: Arc<dyn Renderer>,
    pub cluster: Arc<dyn ClusterClient>,
    pub materializer: SecretMaterializer,
    pub reader: ClusterStateReader,
    pub store: Arc<dyn StateStore>,
    pub publisher: Option<Arc<dyn StatusPublisher>>,
    pub settings: ReconcilerSettings,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("renderer", &self.renderer)
            .field("cluster", &self.cluster)
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        cluster: Arc<dyn ClusterClient>,
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn StateStore>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            renderer,
            reader: ClusterStateReader::new(Arc::clone(&cluster), settings.call_timeout),
            materializer: SecretMaterializer::new(providers, settings.call_timeout),
            cluster,
            store,
            publisher: None,
            settings,
        }
    }

    /// Mirror every recorded status to `publisher`
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn StatusPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Interval between ticks, never below the configured minimum
    #[must_use]
    pub fn reconcile_interval(&self, spec: &ApplicationSpec) -> Duration {
        let interval = spec
            .reconcile_interval
            .as_deref()
            .and_then(|value| match parse_kubernetes_duration(value) {
                Ok(duration) => Some(duration),
                Err(e) => {
                    warn!("Invalid reconcileInterval '{}', using default: {}", value, e);
                    None
                }
            })
            .unwrap_or(self.settings.default_reconcile_interval);
        interval.max(self.settings.min_reconcile_interval)
    }

    /// How long resolved secrets stay cached
    #[must_use]
    pub fn secret_refresh_interval(&self, spec: &ApplicationSpec) -> Duration {
        spec.secret_refresh_interval
            .as_deref()
            .and_then(|value| match parse_kubernetes_duration(value) {
                Ok(duration) => Some(duration),
                Err(e) => {
                    warn!("Invalid secretRefreshInterval '{}', using default: {}", value, e);
                    None
                }
            })
            .unwrap_or(self.settings.default_secret_refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_kinds_resolve_to_kind_names() {
        let config = ControllerConfig {
            managed_kinds: vec![
                "/v1/ConfigMap".to_string(),
                "rbac.authorization.k8s.io/v1/Role".to_string(),
            ],
            ..ControllerConfig::default()
        };
        let settings = ReconcilerSettings::from_config(&config).unwrap();
        assert_eq!(
            settings.managed_kinds.into_iter().collect::<Vec<_>>(),
            vec!["ConfigMap", "Role"]
        );

        let defaults = ReconcilerSettings::default().managed_kinds;
        for kind in ["ConfigMap", "Secret", "Service", "Deployment"] {
            assert!(defaults.contains(kind), "{kind} missing from defaults");
        }
        assert!(!defaults.contains("Namespace"));
    }
}
