//! # Environment Provider
//!
//! Resolves remote keys from the process environment. Intended for local
//! development only; enabled with `ENABLE_ENV_PROVIDER=true`.
//!
//! A remote key such as `db/password` is looked up as `DB_PASSWORD`: ASCII
//! letters are upper-cased and every other character becomes `_`.

use super::{ProviderError, SecretProvider, SecretValue};
use async_trait::async_trait;

pub const ENV_PROVIDER_ID: &str = "env";

#[derive(Debug, Clone)]
pub struct EnvProvider {
    prefix: String,
}

impl EnvProvider {
    /// `prefix` is prepended to every variable name (may be empty)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn variable_name(&self, remote_key: &str) -> String {
        let mapped: String = remote_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{mapped}", self.prefix)
    }
}

impl Default for EnvProvider {
    fn default() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl SecretProvider for EnvProvider {
    fn id(&self) -> &str {
        ENV_PROVIDER_ID
    }

    async fn resolve(&self, remote_key: &str) -> Result<SecretValue, ProviderError> {
        let name = self.variable_name(remote_key);
        match std::env::var(&name) {
            Ok(value) => Ok(SecretValue::new(value)),
            Err(std::env::VarError::NotPresent) => {
                Err(ProviderError::not_found(ENV_PROVIDER_ID, remote_key))
            }
            Err(std::env::VarError::NotUnicode(_)) => Err(ProviderError::unavailable(
                ENV_PROVIDER_ID,
                format!("variable {name} is not valid unicode"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_name_mapping() {
        let provider = EnvProvider::new("GITOPS_");
        assert_eq!(provider.variable_name("db/password"), "GITOPS_DB_PASSWORD");
        assert_eq!(provider.variable_name("api.key-v2"), "GITOPS_API_KEY_V2");
    }

    #[tokio::test]
    async fn test_missing_variable_is_not_found() {
        let provider = EnvProvider::new("GITOPS_RECONCILER_TEST_UNSET_");
        let err = provider.resolve("nothing/here").await.unwrap_err();
        assert_eq!(err.kind(), crate::provider::ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_present_variable_resolves() {
        // PATH is set in every test environment
        let provider = EnvProvider::default();
        let value = provider.resolve("path").await.unwrap();
        assert!(!value.expose().is_empty());
    }
}
