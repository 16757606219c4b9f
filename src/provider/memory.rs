//! In-memory secret provider with fault injection.

use super::{ProviderError, SecretProvider, SecretValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryProvider {
    id: String,
    secrets: RwLock<HashMap<String, SecretValue>>,
    failures: RwLock<HashMap<String, ProviderError>>,
    calls: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secrets: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_secret(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_secret(key, value);
        self
    }

    pub fn set_secret(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(key.into(), SecretValue::new(value));
        }
    }

    pub fn remove_secret(&self, key: &str) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.remove(key);
        }
    }

    /// Make lookups of `key` fail with `error` until cleared
    pub fn fail_with(&self, key: impl Into<String>, error: ProviderError) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(key.into(), error);
        }
    }

    pub fn clear_failure(&self, key: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(key);
        }
    }

    /// Number of `resolve` calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretProvider for InMemoryProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn resolve(&self, remote_key: &str) -> Result<SecretValue, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .failures
            .read()
            .ok()
            .and_then(|failures| failures.get(remote_key).cloned())
        {
            return Err(error);
        }

        self.secrets
            .read()
            .map_err(|_| ProviderError::unavailable(&self.id, "secret store lock poisoned"))?
            .get(remote_key)
            .cloned()
            .ok_or_else(|| ProviderError::not_found(&self.id, remote_key))
    }
}
