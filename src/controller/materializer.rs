//! # Secret Materializer
//!
//! Replaces `ExternalSecret` objects in a desired set with concrete `v1/Secret`
//! objects, resolving every reference through the provider registry.
//!
//! ```yaml
//! apiVersion: gitops-reconciler.io/v1alpha1
//! kind: ExternalSecret
//! metadata:
//!   name: db-credentials
//! spec:
//!   target:
//!     name: db            # optional, defaults to the ExternalSecret name
//!   data:
//!     - secretKey: password
//!       remoteRef:
//!         provider: aws
//!         key: prod/db
//!         property: password   # optional, extracted from a JSON value
//! ```
//!
//! An object whose references do not all resolve is reported as blocked and
//! dropped from the set; it is never applied half-populated.
//!
//! Lookups are memoized for the duration of one tick. Successful values are
//! also kept in a per-application [`SecretCache`] until the secret refresh
//! interval elapses. Expiry is evaluated only when a tick begins, so a tick
//! never sees two different values for the same reference. Failures are not
//! cached across ticks.

use crate::constants::{EXTERNAL_SECRET_KIND, LABEL_MANAGED_BY, MANAGED_BY_VALUE};
use crate::controller::resource::{ResourceId, ResourceObject};
use crate::crd::BlockedObject;
use crate::provider::{ProviderError, ProviderRegistry, SecretValue};
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[error("ExternalSecret {id} is malformed: {reason}")]
pub struct InvalidExternalSecret {
    pub id: ResourceId,
    pub reason: String,
}

/// One reference inside an `ExternalSecret`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Key in the synthesized Secret's `data`
    pub secret_key: String,
    pub remote_ref: RemoteRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRef {
    pub provider: String,
    pub key: String,
    #[serde(default)]
    pub property: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExternalSecretSpec {
    #[serde(default)]
    target: Option<ExternalSecretTarget>,
    #[serde(default)]
    data: Vec<SecretRef>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalSecretTarget {
    #[serde(default)]
    name: Option<String>,
}

/// Parsed `ExternalSecret`: synthesized Secret name plus its references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSecret {
    pub target_name: String,
    pub refs: Vec<SecretRef>,
}

impl ExternalSecret {
    /// Parse the `spec` of an `ExternalSecret` object
    ///
    /// # Errors
    ///
    /// Returns an error if `spec` does not have the expected shape, or if it
    /// has no references.
    pub fn parse(object: &ResourceObject) -> Result<Self, InvalidExternalSecret> {
        let invalid = |reason: String| InvalidExternalSecret {
            id: object.id(),
            reason,
        };
        let spec_value = object
            .content
            .get("spec")
            .cloned()
            .ok_or_else(|| invalid("missing spec".to_string()))?;
        let spec: ExternalSecretSpec =
            serde_json::from_value(spec_value).map_err(|e| invalid(e.to_string()))?;
        if spec.data.is_empty() {
            return Err(invalid("spec.data has no references".to_string()));
        }
        if let Some(empty) = spec
            .data
            .iter()
            .find(|r| r.secret_key.is_empty() || r.remote_ref.key.is_empty())
        {
            return Err(invalid(format!(
                "reference for secretKey '{}' has an empty key",
                empty.secret_key
            )));
        }

        let target_name = spec
            .target
            .and_then(|t| t.name)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| object.name.clone());
        Ok(Self {
            target_name,
            refs: spec.data,
        })
    }
}

/// Desired set after materialization
#[derive(Debug, Clone, Default)]
pub struct MaterializedSet {
    pub objects: Vec<ResourceObject>,
    /// Objects excluded this tick, ordered by identity
    pub blocked: Vec<BlockedObject>,
}

impl MaterializedSet {
    /// First identity claimed twice, counting blocked objects
    ///
    /// A synthesized Secret can collide with a rendered Secret or with
    /// another `ExternalSecret` targeting the same name.
    #[must_use]
    pub fn duplicate_identity(&self) -> Option<ResourceId> {
        let mut seen = BTreeSet::new();
        self.objects
            .iter()
            .map(ResourceObject::id)
            .chain(self.blocked.iter().map(|blocked| blocked.id.clone()))
            .find(|id| !seen.insert(id.clone()))
    }
}

#[derive(Debug)]
struct CachedSecret {
    value: SecretValue,
    fetched_at: Instant,
}

/// Cross-tick cache of resolved values for one application
#[derive(Debug)]
pub struct SecretCache {
    ttl: Duration,
    entries: HashMap<(String, String), CachedSecret>,
}

impl SecretCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    /// Evict expired entries; called once at the start of every tick
    pub fn begin_tick(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, cached| now.saturating_duration_since(cached.fetched_at) < ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves external secret references through the provider registry
#[derive(Debug, Clone)]
pub struct SecretMaterializer {
    providers: Arc<ProviderRegistry>,
    call_timeout: Duration,
}

impl SecretMaterializer {
    pub fn new(providers: Arc<ProviderRegistry>, call_timeout: Duration) -> Self {
        Self {
            providers,
            call_timeout,
        }
    }

    /// Materialize every `ExternalSecret` in `desired`
    ///
    /// # Errors
    ///
    /// Returns an error if an `ExternalSecret` is malformed. Provider failures
    /// are not errors: they block the enclosing object.
    pub async fn materialize(
        &self,
        desired: Vec<ResourceObject>,
        cache: &mut SecretCache,
    ) -> Result<MaterializedSet, InvalidExternalSecret> {
        let mut memo_errors: HashMap<(String, String), ProviderError> = HashMap::new();
        let mut set = MaterializedSet::default();

        for object in desired {
            if object.kind != EXTERNAL_SECRET_KIND {
                set.objects.push(object);
                continue;
            }

            let external = ExternalSecret::parse(&object)?;
            let mut data = BTreeMap::new();
            let mut failure = None;

            for secret_ref in &external.refs {
                match self
                    .resolve_ref(&secret_ref.remote_ref, cache, &mut memo_errors)
                    .await
                {
                    Ok(value) => {
                        data.insert(
                            secret_ref.secret_key.clone(),
                            base64::engine::general_purpose::STANDARD.encode(value.expose()),
                        );
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }

            match failure {
                Some(error) => {
                    warn!(
                        object = %object.id(),
                        reason = %error.kind(),
                        "external secret blocked: {}",
                        error
                    );
                    set.blocked.push(BlockedObject {
                        id: synthesized_id(&object, &external),
                        reason: error.kind(),
                        message: error.to_string(),
                    });
                }
                None => {
                    debug!(object = %object.id(), keys = data.len(), "external secret materialized");
                    set.objects.push(synthesize_secret(&object, &external, data));
                }
            }
        }

        set.blocked.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(set)
    }

    async fn resolve_ref(
        &self,
        remote_ref: &RemoteRef,
        cache: &mut SecretCache,
        memo_errors: &mut HashMap<(String, String), ProviderError>,
    ) -> Result<SecretValue, ProviderError> {
        let value = self
            .lookup(&remote_ref.provider, &remote_ref.key, cache, memo_errors)
            .await?;
        match &remote_ref.property {
            None => Ok(value),
            Some(property) => extract_property(&value, property).ok_or_else(|| {
                ProviderError::not_found(
                    &remote_ref.provider,
                    &format!("{}#{property}", remote_ref.key),
                )
            }),
        }
    }

    async fn lookup(
        &self,
        provider: &str,
        key: &str,
        cache: &mut SecretCache,
        memo_errors: &mut HashMap<(String, String), ProviderError>,
    ) -> Result<SecretValue, ProviderError> {
        let cache_key = (provider.to_string(), key.to_string());
        if let Some(cached) = cache.entries.get(&cache_key) {
            return Ok(cached.value.clone());
        }
        if let Some(error) = memo_errors.get(&cache_key) {
            return Err(error.clone());
        }

        let result = match tokio::time::timeout(
            self.call_timeout,
            self.providers.resolve(provider, key),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::unavailable(
                provider,
                format!("lookup timed out after {}s", self.call_timeout.as_secs()),
            )),
        };

        match result {
            Ok(value) => {
                cache.entries.insert(
                    cache_key,
                    CachedSecret {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(error) => {
                memo_errors.insert(cache_key, error.clone());
                Err(error)
            }
        }
    }
}

fn extract_property(value: &SecretValue, property: &str) -> Option<SecretValue> {
    let parsed: Value = serde_json::from_str(value.expose()).ok()?;
    match parsed.as_object()?.get(property)? {
        Value::String(s) => Some(SecretValue::new(s.as_str())),
        Value::Null => None,
        other => Some(SecretValue::new(other.to_string())),
    }
}

fn synthesized_id(object: &ResourceObject, external: &ExternalSecret) -> ResourceId {
    ResourceId::new("Secret", &object.namespace, &external.target_name)
}

fn synthesize_secret(
    object: &ResourceObject,
    external: &ExternalSecret,
    data: BTreeMap<String, String>,
) -> ResourceObject {
    let mut secret = ResourceObject::new("v1", "Secret", &object.namespace, &external.target_name);
    secret.labels.clone_from(&object.labels);
    secret
        .labels
        .insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    secret.annotations.clone_from(&object.annotations);

    let data: Map<String, Value> = data
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    secret
        .with_field("type", Value::String("Opaque".to_string()))
        .with_field("data", Value::Object(data))
}
