//! # Apply
//!
//! Executes an authorized diff against the cluster, one call per object.
//!
//! Creates run first, then updates, then deletes. Within each group objects
//! are ordered by kind so that service accounts, secrets and config maps
//! exist before the workloads that reference them; deletes run in
//! the reverse order. A failing call is recorded and the batch continues.

use crate::cluster::{ApplyError, ClusterClient};
use crate::controller::diff::DiffResult;
use crate::controller::resource::{ResourceId, ResourceObject};
use crate::crd::{ApplyAction, ObjectError};
use crate::observability::metrics;
use std::cmp::Reverse;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const KIND_ORDER: &[&str] = &[
    "ServiceAccount",
    "Secret",
    "ConfigMap",
    "PersistentVolumeClaim",
    "Role",
    "RoleBinding",
    "Service",
    "Deployment",
    "StatefulSet",
    "DaemonSet",
    "Job",
    "CronJob",
    "Ingress",
];

/// Sort key: known kinds by dependency order, everything else after them by id
fn apply_order(id: &ResourceId) -> (usize, ResourceId) {
    let rank = KIND_ORDER
        .iter()
        .position(|kind| *kind == id.kind)
        .unwrap_or(KIND_ORDER.len());
    (rank, id.clone())
}

/// Apply every entry of `diff`, returning the calls that failed
pub async fn apply_diff(
    cluster: &dyn ClusterClient,
    diff: &DiffResult,
    call_timeout: Duration,
) -> Vec<ObjectError> {
    let mut errors = Vec::new();

    let mut creates: Vec<&ResourceObject> = diff.to_create.iter().map(|entry| &entry.object).collect();
    creates.sort_by_cached_key(|object| apply_order(&object.id()));
    for object in creates {
        let result = timed(call_timeout, object.id(), ApplyAction::Create, cluster.apply(object)).await;
        record(result, object.id(), ApplyAction::Create, &mut errors);
    }

    let mut updates: Vec<&ResourceObject> = diff.to_update.iter().map(|entry| &entry.object).collect();
    updates.sort_by_cached_key(|object| apply_order(&object.id()));
    for object in updates {
        let result = timed(call_timeout, object.id(), ApplyAction::Update, cluster.apply(object)).await;
        record(result, object.id(), ApplyAction::Update, &mut errors);
    }

    let mut deletes: Vec<&ResourceId> = diff.to_delete.iter().map(|entry| &entry.id).collect();
    deletes.sort_by_cached_key(|id| Reverse(apply_order(id)));
    for id in deletes {
        let result = timed(call_timeout, id.clone(), ApplyAction::Delete, cluster.delete(id)).await;
        record(result, id.clone(), ApplyAction::Delete, &mut errors);
    }

    errors
}

async fn timed<F>(
    call_timeout: Duration,
    id: ResourceId,
    action: ApplyAction,
    call: F,
) -> Result<(), ApplyError>
where
    F: Future<Output = Result<(), ApplyError>>,
{
    match tokio::time::timeout(call_timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ApplyError::new(
            id,
            action,
            format!("timed out after {}s", call_timeout.as_secs()),
        )),
    }
}

fn record(
    result: Result<(), ApplyError>,
    id: ResourceId,
    action: ApplyAction,
    errors: &mut Vec<ObjectError>,
) {
    match result {
        Ok(()) => {
            debug!(object = %id, action = %action, "applied");
            metrics::increment_objects_applied(action.as_str());
        }
        Err(e) => {
            warn!(object = %id, action = %action, "apply failed: {}", e.message);
            metrics::increment_apply_errors();
            // The diff decides the action, whatever the adapter reported
            errors.push(ObjectError {
                id,
                action,
                message: e.message,
            });
        }
    }
}
