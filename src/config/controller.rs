//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS, DEFAULT_FIELD_MANAGER, DEFAULT_HISTORY_LIMIT,
    DEFAULT_KUSTOMIZE_BINARY, DEFAULT_MANAGED_KINDS, DEFAULT_RECONCILE_INTERVAL,
    DEFAULT_SECRET_REFRESH_INTERVAL, DEFAULT_SERVER_PORT, DEFAULT_SOURCES_DIR,
    MIN_RECONCILE_INTERVAL_SECS,
};
use std::path::PathBuf;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Port for the control surface, `/metrics`, `/healthz` and `/readyz`
    pub server_port: u16,
    /// Reconcile interval used when an application does not set one
    pub default_reconcile_interval: String,
    /// Secret refresh interval used when an application does not set one
    pub default_secret_refresh_interval: String,
    /// Minimum reconcile interval (seconds)
    /// Enforced minimum to prevent API rate limiting
    pub min_reconcile_interval_secs: u64,
    /// Timeout applied to every renderer, provider and cluster call (seconds)
    pub external_call_timeout_secs: u64,
    /// Sync Runs retained per application
    pub history_limit: usize,
    /// Directory for durable application specs and sync history
    /// When unset, state is kept in memory only
    pub state_dir: Option<PathBuf>,
    /// Directory holding pre-fetched source checkouts
    pub sources_dir: PathBuf,
    /// Kustomize binary
    pub kustomize_binary: String,
    /// Field manager used for server-side apply
    pub field_manager: String,
    /// Watch `Application` custom resources and mirror them into the registry
    pub watch_application_crds: bool,
    /// Kinds read by the cluster state reader (`group/version/Kind`)
    pub managed_kinds: Vec<String>,
    /// AWS region; enables the `aws` secret provider when set
    pub aws_region: Option<String>,
    /// Register the `env` secret provider (local development only)
    pub enable_env_provider: bool,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_source(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup with defaults
    pub fn from_source<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            server_port: parsed_or_default(&lookup, "SERVER_PORT", DEFAULT_SERVER_PORT),
            default_reconcile_interval: string_or_default(
                &lookup,
                "DEFAULT_RECONCILE_INTERVAL",
                DEFAULT_RECONCILE_INTERVAL,
            ),
            default_secret_refresh_interval: string_or_default(
                &lookup,
                "DEFAULT_SECRET_REFRESH_INTERVAL",
                DEFAULT_SECRET_REFRESH_INTERVAL,
            ),
            min_reconcile_interval_secs: parsed_or_default(
                &lookup,
                "MIN_RECONCILE_INTERVAL_SECS",
                MIN_RECONCILE_INTERVAL_SECS,
            ),
            external_call_timeout_secs: parsed_or_default(
                &lookup,
                "EXTERNAL_CALL_TIMEOUT_SECS",
                DEFAULT_EXTERNAL_CALL_TIMEOUT_SECS,
            ),
            history_limit: parsed_or_default(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT),
            state_dir: lookup("STATE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            sources_dir: PathBuf::from(string_or_default(
                &lookup,
                "SOURCES_DIR",
                DEFAULT_SOURCES_DIR,
            )),
            kustomize_binary: string_or_default(
                &lookup,
                "KUSTOMIZE_BINARY",
                DEFAULT_KUSTOMIZE_BINARY,
            ),
            field_manager: string_or_default(&lookup, "FIELD_MANAGER", DEFAULT_FIELD_MANAGER),
            watch_application_crds: bool_or_default(&lookup, "WATCH_APPLICATION_CRDS", true),
            managed_kinds: lookup("MANAGED_KINDS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|kinds| !kinds.is_empty())
                .unwrap_or_else(|| {
                    DEFAULT_MANAGED_KINDS
                        .iter()
                        .map(ToString::to_string)
                        .collect()
                }),
            aws_region: lookup("AWS_REGION").filter(|v| !v.trim().is_empty()),
            enable_env_provider: bool_or_default(&lookup, "ENABLE_ENV_PROVIDER", false),
            log_level: string_or_default(&lookup, "LOG_LEVEL", "INFO"),
            log_format: string_or_default(&lookup, "LOG_FORMAT", "json"),
        }
    }

    /// Get the external call timeout duration
    #[must_use]
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_secs)
    }

    /// Get minimum reconcile interval duration
    #[must_use]
    pub fn min_reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.min_reconcile_interval_secs)
    }
}

/// Read a value and parse it, falling back to the default on absence or parse failure
fn parsed_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a value as boolean or return default
fn bool_or_default<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}

/// Read a value as string or return default
fn string_or_default<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ControllerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_source(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.default_reconcile_interval, "3m");
        assert_eq!(config.default_secret_refresh_interval, "1h");
        assert_eq!(config.history_limit, 20);
        assert!(config.state_dir.is_none());
        assert!(config.watch_application_crds);
        assert!(config.aws_region.is_none());
        assert_eq!(config.managed_kinds.len(), DEFAULT_MANAGED_KINDS.len());
        assert_eq!(config.external_call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("SERVER_PORT", "9090"),
            ("HISTORY_LIMIT", "5"),
            ("STATE_DIR", "/data/state"),
            ("WATCH_APPLICATION_CRDS", "false"),
            ("MANAGED_KINDS", "/v1/ConfigMap, apps/v1/Deployment ,"),
            ("AWS_REGION", "eu-west-1"),
        ]);
        assert_eq!(config.server_port, 9090);
        assert_eq!(config.history_limit, 5);
        assert_eq!(config.state_dir, Some(PathBuf::from("/data/state")));
        assert!(!config.watch_application_crds);
        assert_eq!(
            config.managed_kinds,
            vec!["/v1/ConfigMap".to_string(), "apps/v1/Deployment".to_string()]
        );
        assert_eq!(config.aws_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[("SERVER_PORT", "not-a-port"), ("HISTORY_LIMIT", "-1")]);
        assert_eq!(config.server_port, DEFAULT_SERVER_PORT);
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn test_bool_parsing() {
        assert!(config_from(&[("ENABLE_ENV_PROVIDER", "YES")]).enable_env_provider);
        assert!(config_from(&[("ENABLE_ENV_PROVIDER", "1")]).enable_env_provider);
        assert!(!config_from(&[("ENABLE_ENV_PROVIDER", "nope")]).enable_env_provider);
    }
}
