//! Field-level patches produced by the diff engine.

use crate::controller::resource::ResourceObject;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Path to a field of a resource object
///
/// Label and annotation paths start with `metadata`; every other path starts
/// with a top-level content key (`spec`, `data`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// `(labels|annotations, key)` when the path addresses object metadata
    fn metadata_entry(&self) -> Option<(&str, &str)> {
        match self.0.as_slice() {
            [root, map, key] if root == "metadata" => Some((map.as_str(), key.as_str())),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum PatchOp {
    SetField { path: FieldPath, value: Value },
    DeleteField { path: FieldPath },
}

impl PatchOp {
    #[must_use]
    pub fn path(&self) -> &FieldPath {
        match self {
            PatchOp::SetField { path, .. } | PatchOp::DeleteField { path } => path,
        }
    }
}

/// Ordered list of field operations turning a live object into its desired shape
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOp>);

impl Patch {
    /// Build a patch; operations are sorted by field path
    #[must_use]
    pub fn new(mut ops: Vec<PatchOp>) -> Self {
        ops.sort_by(|a, b| a.path().cmp(b.path()));
        Self(ops)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn ops(&self) -> &[PatchOp] {
        &self.0
    }

    /// Paths touched by the patch, for logging
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.0.iter().map(|op| op.path().to_string()).collect()
    }

    /// Apply every operation to `object` in order
    pub fn apply_to(&self, object: &mut ResourceObject) {
        for op in &self.0 {
            match op {
                PatchOp::SetField { path, value } => set_field(object, path, value),
                PatchOp::DeleteField { path } => delete_field(object, path),
            }
        }
    }
}

fn set_field(object: &mut ResourceObject, path: &FieldPath, value: &Value) {
    if let Some((map, key)) = path.metadata_entry() {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match map {
            "labels" => {
                object.labels.insert(key.to_string(), text);
            }
            "annotations" => {
                object.annotations.insert(key.to_string(), text);
            }
            _ => {}
        }
        return;
    }

    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };
    let mut current: &mut Map<String, Value> = &mut object.content;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), strip_nulls(value));
}

fn delete_field(object: &mut ResourceObject, path: &FieldPath) {
    if let Some((map, key)) = path.metadata_entry() {
        match map {
            "labels" => {
                object.labels.remove(key);
            }
            "annotations" => {
                object.annotations.remove(key);
            }
            _ => {}
        }
        return;
    }

    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };
    let mut current: &mut Map<String, Value> = &mut object.content;
    for segment in parents {
        match current.get_mut(segment.as_str()) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }
    current.remove(last.as_str());
}

/// Drop `null` members of nested objects; arrays are kept as-is
#[must_use]
pub fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_sets_nested_field() {
        let mut object = ResourceObject::new("apps/v1", "Deployment", "demo", "web");
        Patch::new(vec![PatchOp::SetField {
            path: FieldPath::new(["spec", "template", "replicas"]),
            value: json!(3),
        }])
        .apply_to(&mut object);
        assert_eq!(object.field(&["spec", "template", "replicas"]), Some(&json!(3)));
    }

    #[test]
    fn test_apply_labels_and_deletes() {
        let mut object = ResourceObject::new("v1", "ConfigMap", "demo", "c")
            .with_annotation("stale", "yes")
            .with_field("data", json!({"a": "1", "b": "2"}));
        Patch::new(vec![
            PatchOp::SetField {
                path: FieldPath::new(["metadata", "labels", "tier"]),
                value: json!("web"),
            },
            PatchOp::DeleteField {
                path: FieldPath::new(["metadata", "annotations", "stale"]),
            },
            PatchOp::DeleteField {
                path: FieldPath::new(["data", "b"]),
            },
        ])
        .apply_to(&mut object);

        assert_eq!(object.label("tier"), Some("web"));
        assert!(object.annotations.is_empty());
        assert_eq!(object.field(&["data"]), Some(&json!({"a": "1"})));
    }

    #[test]
    fn test_ops_are_sorted_by_path() {
        let patch = Patch::new(vec![
            PatchOp::DeleteField {
                path: FieldPath::new(["spec", "z"]),
            },
            PatchOp::SetField {
                path: FieldPath::new(["data", "a"]),
                value: json!("1"),
            },
        ]);
        assert_eq!(patch.paths(), vec!["data.a".to_string(), "spec.z".to_string()]);
    }

    #[test]
    fn test_strip_nulls_recurses_into_objects_only() {
        let value = json!({"a": null, "b": {"c": null, "d": 1}, "e": [null]});
        assert_eq!(strip_nulls(&value), json!({"b": {"d": 1}, "e": [null]}));
    }
}
