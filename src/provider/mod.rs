//! # Provider Modules
//!
//! Secret provider port and its adapters.
//!
//! Each credential backend implements [`SecretProvider`] and is registered
//! under a provider id in the [`ProviderRegistry`]. External secret
//! references name the provider id they resolve through.
//!
//! - `aws`: AWS Secrets Manager
//! - `env`: process environment (local development)
//! - `memory`: in-memory store used by tests and dry runs

use crate::observability::metrics;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod aws;
pub mod env;
pub mod memory;

pub use aws::AwsSecretsManager;
pub use env::EnvProvider;
pub use memory::InMemoryProvider;

/// A resolved secret value
///
/// Zeroized on drop; `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(<redacted>)")
    }
}

/// Coarse classification of provider failures, safe to persist in status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum ProviderErrorKind {
    NotFound,
    Unauthorized,
    Unavailable,
}

impl ProviderErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Unauthorized => "Unauthorized",
            Self::Unavailable => "Unavailable",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("secret '{key}' not found in provider '{provider}'")]
    NotFound { provider: String, key: String },
    #[error("provider '{provider}' denied access to '{key}': {message}")]
    Unauthorized {
        provider: String,
        key: String,
        message: String,
    },
    #[error("provider '{provider}' is unavailable: {message}")]
    Unavailable { provider: String, message: String },
}

impl ProviderError {
    #[must_use]
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::NotFound { .. } => ProviderErrorKind::NotFound,
            Self::Unauthorized { .. } => ProviderErrorKind::Unauthorized,
            Self::Unavailable { .. } => ProviderErrorKind::Unavailable,
        }
    }

    pub fn not_found(provider: &str, key: &str) -> Self {
        Self::NotFound {
            provider: provider.to_string(),
            key: key.to_string(),
        }
    }

    pub fn unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Provider trait for credential backends
#[async_trait]
pub trait SecretProvider: Send + Sync + fmt::Debug {
    /// Provider id referenced by `remoteRef.provider`
    fn id(&self) -> &str;

    /// Resolve one remote key to its current value
    async fn resolve(&self, remote_key: &str) -> Result<SecretValue, ProviderError>;
}

/// Dispatches lookups to the provider registered under a provider id
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn SecretProvider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own id, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn SecretProvider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    #[must_use]
    pub fn with(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve `(provider id, remote key)`
    ///
    /// An unregistered provider id resolves to `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns the provider's error, or `NotFound` for unknown provider ids.
    pub async fn resolve(
        &self,
        provider_id: &str,
        remote_key: &str,
    ) -> Result<SecretValue, ProviderError> {
        let Some(provider) = self.providers.get(provider_id) else {
            metrics::increment_provider_errors(provider_id);
            return Err(ProviderError::not_found(provider_id, remote_key));
        };

        match provider.resolve(remote_key).await {
            Ok(value) => {
                metrics::increment_secrets_resolved(provider_id);
                Ok(value)
            }
            Err(e) => {
                metrics::increment_provider_errors(provider_id);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_debug_is_redacted() {
        let value = SecretValue::new("hunter2");
        assert_eq!(format!("{value:?}"), "SecretValue(<redacted>)");
        assert_eq!(value.expose(), "hunter2");
    }

    #[test]
    fn test_provider_error_kind() {
        assert_eq!(
            ProviderError::not_found("aws", "db").kind(),
            ProviderErrorKind::NotFound
        );
        assert_eq!(
            ProviderError::unavailable("aws", "timeout").kind(),
            ProviderErrorKind::Unavailable
        );
        let unauthorized = ProviderError::Unauthorized {
            provider: "aws".to_string(),
            key: "db".to_string(),
            message: "denied".to_string(),
        };
        assert_eq!(unauthorized.kind(), ProviderErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_provider_id() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(InMemoryProvider::new("vault").with_secret("db/password", "s3cr3t")));

        let value = registry.resolve("vault", "db/password").await.unwrap();
        assert_eq!(value.expose(), "s3cr3t");

        let missing = registry.resolve("vault", "db/user").await.unwrap_err();
        assert_eq!(missing.kind(), ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_registry_unknown_provider_is_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("nope", "key").await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::NotFound);
    }
}
