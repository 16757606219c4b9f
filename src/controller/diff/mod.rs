//! # Diff Engine
//!
//! Computes the changes that turn a live object set into a desired one.
//!
//! Objects are matched by [`ResourceId`]. Only fields present in the desired
//! object are compared (`content`, `metadata.labels`, `metadata.annotations`):
//! fields the cluster adds on its own never count as drift. Nested objects are
//! compared member by member; arrays and scalars compare atomically. A desired
//! `null` on a field present in live state yields a delete-field operation.
//!
//! The engine is pure: it never touches the cluster. Every output collection is
//! ordered by identity and every patch by field path, so identical inputs
//! always produce identical results.

mod patch;

pub use patch::{strip_nulls, FieldPath, Patch, PatchOp};

use crate::constants::LABEL_APPLICATION;
use crate::controller::resource::{ResourceId, ResourceObject};
use crate::crd::DiffSummary;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Why an object appears in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffReason {
    /// Desired object has no live counterpart
    Missing,
    /// Live object differs from desired on a desired field
    Drifted,
    /// Owned live object has no desired counterpart
    Orphaned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateEntry {
    pub object: ResourceObject,
    pub reason: DiffReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEntry {
    /// Full desired object, sent to the cluster with server-side apply
    pub object: ResourceObject,
    pub patch: Patch,
    pub reason: DiffReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteEntry {
    pub id: ResourceId,
    pub reason: DiffReason,
}

#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Application whose ownership label marks prunable live objects
    pub owner: String,
    pub prune: bool,
    /// Identities that must never be pruned (e.g. objects blocked this tick)
    pub protected: BTreeSet<ResourceId>,
}

impl DiffOptions {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            prune: false,
            protected: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    #[must_use]
    pub fn with_protected(mut self, protected: impl IntoIterator<Item = ResourceId>) -> Self {
        self.protected.extend(protected);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult {
    pub to_create: Vec<CreateEntry>,
    pub to_update: Vec<UpdateEntry>,
    pub to_delete: Vec<DeleteEntry>,
    /// Orphans kept because pruning is disabled
    pub retained_orphans: Vec<ResourceId>,
    /// Matched objects with an empty patch
    pub in_sync: usize,
}

impl DiffResult {
    /// True when nothing needs to be created, updated or deleted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    #[must_use]
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            to_create: self.to_create.len(),
            to_update: self.to_update.len(),
            to_delete: self.to_delete.len(),
            retained_orphans: self.retained_orphans.len(),
            in_sync: self.in_sync,
        }
    }
}

/// Compute the diff between `desired` and `live`
#[must_use]
pub fn diff(desired: &[ResourceObject], live: &[ResourceObject], options: &DiffOptions) -> DiffResult {
    let desired_by_id: BTreeMap<ResourceId, &ResourceObject> =
        desired.iter().map(|object| (object.id(), object)).collect();
    let live_by_id: BTreeMap<ResourceId, &ResourceObject> =
        live.iter().map(|object| (object.id(), object)).collect();

    let mut result = DiffResult::default();

    for (id, desired_object) in &desired_by_id {
        match live_by_id.get(id) {
            None => result.to_create.push(CreateEntry {
                object: (*desired_object).clone(),
                reason: DiffReason::Missing,
            }),
            Some(live_object) => {
                let patch = compare_objects(desired_object, live_object);
                if patch.is_empty() {
                    result.in_sync += 1;
                } else {
                    result.to_update.push(UpdateEntry {
                        object: (*desired_object).clone(),
                        patch,
                        reason: DiffReason::Drifted,
                    });
                }
            }
        }
    }

    for (id, live_object) in &live_by_id {
        if desired_by_id.contains_key(id) {
            continue;
        }
        if live_object.label(LABEL_APPLICATION) != Some(options.owner.as_str()) {
            continue;
        }
        if options.prune && !options.protected.contains(id) {
            result.to_delete.push(DeleteEntry {
                id: id.clone(),
                reason: DiffReason::Orphaned,
            });
        } else {
            result.retained_orphans.push(id.clone());
        }
    }

    result
}

/// Patch turning `live` into `desired`, restricted to desired fields
#[must_use]
pub fn compare_objects(desired: &ResourceObject, live: &ResourceObject) -> Patch {
    let mut ops = Vec::new();

    compare_string_map(&desired.labels, &live.labels, "labels", &mut ops);
    compare_string_map(&desired.annotations, &live.annotations, "annotations", &mut ops);
    compare_maps(&desired.content, &live.content, &FieldPath::default(), &mut ops);

    Patch::new(ops)
}

fn compare_string_map(
    desired: &BTreeMap<String, String>,
    live: &BTreeMap<String, String>,
    map: &str,
    ops: &mut Vec<PatchOp>,
) {
    for (key, value) in desired {
        if live.get(key) != Some(value) {
            ops.push(PatchOp::SetField {
                path: FieldPath::new(["metadata", map, key.as_str()]),
                value: Value::String(value.clone()),
            });
        }
    }
}

fn compare_maps(
    desired: &Map<String, Value>,
    live: &Map<String, Value>,
    path: &FieldPath,
    ops: &mut Vec<PatchOp>,
) {
    for (key, desired_value) in desired {
        let child = path.child(key);
        let live_value = live.get(key);
        if desired_value.is_null() {
            if live_value.is_some_and(|v| !v.is_null()) {
                ops.push(PatchOp::DeleteField { path: child });
            }
            continue;
        }
        compare_values(desired_value, live_value, child, ops);
    }
}

fn compare_values(desired: &Value, live: Option<&Value>, path: FieldPath, ops: &mut Vec<PatchOp>) {
    match (desired, live) {
        (Value::Object(desired_map), Some(Value::Object(live_map))) => {
            compare_maps(desired_map, live_map, &path, ops);
        }
        (Value::Object(_), _) => ops.push(PatchOp::SetField {
            path,
            value: strip_nulls(desired),
        }),
        (_, Some(live_value)) if live_value == desired => {}
        _ => ops.push(PatchOp::SetField {
            path,
            value: desired.clone(),
        }),
    }
}
