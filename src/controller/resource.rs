//! # Resource Objects
//!
//! The typed view of a Kubernetes-style object shared by the renderer, the
//! cluster state reader, the diff engine and the cluster port.
//!
//! A [`ResourceObject`] keeps identity and metadata in typed fields and every
//! other top-level field (`spec`, `data`, `type`, ...) in `content`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identity of an object within an application: (kind, namespace, name)
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not a mapping")]
    NotAnObject,
    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("manifest field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("failed to parse YAML manifest stream: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One Kubernetes-style object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceObject {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    /// Empty until the reconciler defaults it to the destination namespace
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Every top-level field except `apiVersion`, `kind` and `metadata`
    #[serde(default)]
    pub content: Map<String, Value>,
}

impl ResourceObject {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            content: Map::new(),
        }
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.content.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.kind, &self.namespace, &self.name)
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Look up a nested content field, e.g. `["spec", "replicas"]`
    #[must_use]
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.content.get(*first)?;
        for segment in rest {
            current = current.as_object()?.get(*segment)?;
        }
        Some(current)
    }

    /// Build a resource object from a full manifest (`apiVersion`, `kind`, `metadata`, ...)
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is not a mapping, lacks identity fields,
    /// or carries non-string labels/annotations.
    pub fn from_manifest(manifest: Value) -> Result<Self, ManifestError> {
        let Value::Object(mut map) = manifest else {
            return Err(ManifestError::NotAnObject);
        };

        let api_version = take_string(&mut map, "apiVersion")?;
        let kind = take_string(&mut map, "kind")?;
        let metadata = match map.remove("metadata") {
            Some(Value::Object(metadata)) => metadata,
            Some(_) => {
                return Err(ManifestError::InvalidField {
                    field: "metadata",
                    reason: "expected a mapping".to_string(),
                })
            }
            None => return Err(ManifestError::MissingField("metadata")),
        };

        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or(ManifestError::MissingField("metadata.name"))?
            .to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let labels = string_map(metadata.get("labels"), "metadata.labels")?;
        let annotations = string_map(metadata.get("annotations"), "metadata.annotations")?;

        // Server-populated top-level fields are not part of the desired shape
        map.remove("status");

        Ok(Self {
            api_version,
            kind,
            name,
            namespace,
            labels,
            annotations,
            content: map,
        })
    }

    /// Render the object back into a full manifest
    #[must_use]
    pub fn to_manifest(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), Value::String(self.name.clone()));
        if !self.namespace.is_empty() {
            metadata.insert(
                "namespace".to_string(),
                Value::String(self.namespace.clone()),
            );
        }
        if !self.labels.is_empty() {
            metadata.insert("labels".to_string(), string_map_value(&self.labels));
        }
        if !self.annotations.is_empty() {
            metadata.insert("annotations".to_string(), string_map_value(&self.annotations));
        }

        let mut manifest = Map::new();
        manifest.insert(
            "apiVersion".to_string(),
            Value::String(self.api_version.clone()),
        );
        manifest.insert("kind".to_string(), Value::String(self.kind.clone()));
        manifest.insert("metadata".to_string(), Value::Object(metadata));
        for (key, value) in &self.content {
            manifest.insert(key.clone(), value.clone());
        }
        Value::Object(manifest)
    }
}

fn take_string(map: &mut Map<String, Value>, field: &'static str) -> Result<String, ManifestError> {
    match map.remove(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(ManifestError::InvalidField {
            field,
            reason: "expected a non-empty string".to_string(),
        }),
        None => Err(ManifestError::MissingField(field)),
    }
}

fn string_map(
    value: Option<&Value>,
    field: &'static str,
) -> Result<BTreeMap<String, String>, ManifestError> {
    let Some(value) = value else {
        return Ok(BTreeMap::new());
    };
    if value.is_null() {
        return Ok(BTreeMap::new());
    }
    let object = value.as_object().ok_or_else(|| ManifestError::InvalidField {
        field,
        reason: "expected a mapping".to_string(),
    })?;
    object
        .iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            other => Err(ManifestError::InvalidField {
                field,
                reason: format!("value of '{k}' must be a string, got {other}"),
            }),
        })
        .collect()
}

fn string_map_value(map: &BTreeMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Parse a multi-document YAML stream (e.g. `kustomize build` output)
///
/// Empty documents are skipped.
///
/// # Errors
///
/// Returns an error if a document is not valid YAML or not a valid manifest.
pub fn parse_manifest_stream(yaml: &str) -> Result<Vec<ResourceObject>, ManifestError> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        objects.push(ResourceObject::from_manifest(value)?);
    }
    Ok(objects)
}

/// Equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// True when every selector term is present with the same value
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Kubernetes query form: `k1=v1,k2=v2`
    #[must_use]
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// SHA-256 fingerprint of a desired set, independent of input order and key order
#[must_use]
pub fn desired_revision(objects: &[ResourceObject]) -> String {
    let mut sorted: Vec<&ResourceObject> = objects.iter().collect();
    sorted.sort_by_key(|object| object.id());

    let mut hasher = Sha256::new();
    for object in sorted {
        let mut canonical = String::new();
        write_canonical(&object.to_manifest(), &mut canonical);
        hasher.update(canonical.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Serialize with object keys sorted, whatever map ordering serde_json was built with
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_manifest_splits_metadata_and_content() {
        let object = ResourceObject::from_manifest(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "demo",
                "labels": {"app": "web"},
                "annotations": {"note": "x"}
            },
            "spec": {"replicas": 2},
            "status": {"readyReplicas": 2}
        }))
        .unwrap();

        assert_eq!(object.id(), ResourceId::new("Deployment", "demo", "web"));
        assert_eq!(object.label("app"), Some("web"));
        assert_eq!(object.annotations.get("note").map(String::as_str), Some("x"));
        assert_eq!(object.field(&["spec", "replicas"]), Some(&json!(2)));
        assert!(!object.content.contains_key("status"));
    }

    #[test]
    fn test_from_manifest_rejects_missing_name() {
        let err = ResourceObject::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {}
        }))
        .unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("metadata.name")));
    }

    #[test]
    fn test_from_manifest_rejects_non_string_labels() {
        let err = ResourceObject::from_manifest(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "c", "labels": {"replicas": 3}}
        }))
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidField { .. }));
    }

    #[test]
    fn test_to_manifest_restores_shape() {
        let object = ResourceObject::new("v1", "ConfigMap", "demo", "settings")
            .with_label("tier", "backend")
            .with_field("data", json!({"LOG_LEVEL": "debug"}));
        let manifest = object.to_manifest();
        assert_eq!(manifest["metadata"]["namespace"], json!("demo"));
        assert_eq!(manifest["metadata"]["labels"]["tier"], json!("backend"));
        assert_eq!(manifest["data"]["LOG_LEVEL"], json!("debug"));
        assert_eq!(ResourceObject::from_manifest(manifest).unwrap(), object);
    }

    #[test]
    fn test_parse_manifest_stream_skips_empty_documents() {
        let yaml = r"
---
apiVersion: v1
kind: Service
metadata:
  name: web
spec:
  ports:
  - port: 80
---
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
data:
  key: value
";
        let objects = parse_manifest_stream(yaml).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].kind, "Service");
        assert_eq!(objects[1].name, "settings");
        assert_eq!(objects[1].namespace, "");
    }

    #[test]
    fn test_label_selector() {
        let selector = LabelSelector::new()
            .with("gitops-reconciler.io/application", "demo")
            .with("tier", "web");
        let mut labels = BTreeMap::new();
        labels.insert("gitops-reconciler.io/application".to_string(), "demo".to_string());
        assert!(!selector.matches(&labels));
        labels.insert("tier".to_string(), "web".to_string());
        assert!(selector.matches(&labels));
        assert_eq!(
            selector.to_query(),
            "gitops-reconciler.io/application=demo,tier=web"
        );
    }

    #[test]
    fn test_desired_revision_ignores_order() {
        let a = ResourceObject::new("v1", "ConfigMap", "demo", "a")
            .with_field("data", json!({"x": "1", "y": "2"}));
        let b = ResourceObject::new("v1", "Service", "demo", "b");
        assert_eq!(
            desired_revision(&[a.clone(), b.clone()]),
            desired_revision(&[b.clone(), a.clone()])
        );

        let changed = a.with_field("data", json!({"x": "1", "y": "3"}));
        assert_ne!(desired_revision(&[changed, b.clone()]), desired_revision(&[b]));
    }
}
