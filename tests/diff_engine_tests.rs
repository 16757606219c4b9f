//! # Diff Engine Tests
//!
//! Scenario tests for the diff engine against hand-built live state.

mod common;

use common::{deployment, owned_config_map, service, NAMESPACE};
use gitops_reconciler::cluster::{ClusterClient, InMemoryCluster};
use gitops_reconciler::constants::LABEL_APPLICATION;
use gitops_reconciler::controller::diff::{diff, DiffOptions, DiffReason, FieldPath, PatchOp};
use gitops_reconciler::controller::reconciler::apply_diff;
use gitops_reconciler::controller::render::normalize;
use gitops_reconciler::controller::resource::{LabelSelector, ResourceId, ResourceObject};
use serde_json::json;
use std::time::Duration;

fn desired() -> Vec<ResourceObject> {
    normalize(vec![deployment(1), service()], "demo", NAMESPACE).unwrap()
}

/// Live copy of a desired object, as the cluster would report it
fn live(object: &ResourceObject) -> ResourceObject {
    object
        .clone()
        .with_annotation("deployment.kubernetes.io/revision", "3")
        .with_field("status", json!({"readyReplicas": 1}))
}

#[test]
fn test_demo_drift_produces_single_replicas_update() {
    let desired = desired();
    let mut drifted = live(&desired[0]);
    drifted.content["spec"]["replicas"] = json!(5);
    let live_state = vec![drifted, live(&desired[1])];

    let result = diff(&desired, &live_state, &DiffOptions::new("demo"));

    assert!(result.to_create.is_empty());
    assert!(result.to_delete.is_empty());
    assert_eq!(result.to_update.len(), 1);
    let update = &result.to_update[0];
    assert_eq!(update.object.id(), ResourceId::new("Deployment", NAMESPACE, "d"));
    assert_eq!(update.reason, DiffReason::Drifted);
    assert_eq!(
        update.patch.ops(),
        &[PatchOp::SetField {
            path: FieldPath::new(["spec", "replicas"]),
            value: json!(1),
        }]
    );
    assert_eq!(result.in_sync, 1);
}

#[test]
fn test_prune_scenario_deletes_orphaned_config_map() {
    let desired = desired();
    let mut drifted = live(&desired[0]);
    drifted.content["spec"]["replicas"] = json!(5);
    let live_state = vec![drifted, live(&desired[1]), owned_config_map("c")];

    let result = diff(&desired, &live_state, &DiffOptions::new("demo").with_prune(true));

    assert_eq!(result.to_update.len(), 1);
    assert!(result.to_create.is_empty());
    assert_eq!(result.to_delete.len(), 1);
    assert_eq!(result.to_delete[0].id, ResourceId::new("ConfigMap", NAMESPACE, "c"));
    assert_eq!(result.to_delete[0].reason, DiffReason::Orphaned);
}

#[test]
fn test_prune_disabled_never_deletes() {
    let desired = desired();
    let live_state = vec![
        owned_config_map("a"),
        owned_config_map("b"),
        owned_config_map("c"),
    ];

    let result = diff(&desired, &live_state, &DiffOptions::new("demo"));

    assert!(result.to_delete.is_empty());
    assert_eq!(result.retained_orphans.len(), 3);
    assert_eq!(result.summary().retained_orphans, 3);
}

#[test]
fn test_objects_owned_by_other_applications_are_ignored() {
    let foreign = ResourceObject::new("v1", "ConfigMap", NAMESPACE, "other")
        .with_label(LABEL_APPLICATION, "billing");

    let result = diff(&desired(), &[foreign], &DiffOptions::new("demo").with_prune(true));

    assert!(result.to_delete.is_empty());
    assert!(result.retained_orphans.is_empty());
}

#[test]
fn test_unchanged_desired_fields_are_idempotent() {
    let desired = desired();
    let live_state: Vec<ResourceObject> = desired.iter().map(live).collect();

    let result = diff(&desired, &live_state, &DiffOptions::new("demo").with_prune(true));

    assert!(result.is_empty());
    assert_eq!(result.in_sync, 2);
}

#[test]
fn test_diff_output_is_deterministic() {
    let mut desired = normalize(
        vec![
            owned_config_map("z"),
            service(),
            owned_config_map("a"),
            deployment(2),
        ],
        "demo",
        NAMESPACE,
    )
    .unwrap();
    let first = diff(&desired, &[], &DiffOptions::new("demo"));
    desired.reverse();
    let second = diff(&desired, &[], &DiffOptions::new("demo"));

    let ids = |result: &gitops_reconciler::controller::diff::DiffResult| {
        result
            .to_create
            .iter()
            .map(|entry| entry.object.id())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
    let mut sorted = ids(&first);
    sorted.sort();
    assert_eq!(ids(&first), sorted);
}

#[tokio::test]
async fn test_apply_then_rediff_converges() {
    let cluster = InMemoryCluster::new();
    let desired = normalize(
        vec![
            deployment(3),
            service(),
            ResourceObject::new("v1", "ConfigMap", "", "settings")
                .with_annotation("note", "rendered")
                .with_field("data", json!({"LOG_LEVEL": "debug", "REMOVED": null})),
        ],
        "demo",
        NAMESPACE,
    )
    .unwrap();

    let mut drifted = live(&desired[0]);
    drifted.content["spec"]["replicas"] = json!(7);
    cluster.insert(drifted);
    cluster.insert(
        ResourceObject::new("v1", "ConfigMap", NAMESPACE, "settings")
            .with_label(LABEL_APPLICATION, "demo")
            .with_field("data", json!({"LOG_LEVEL": "info", "REMOVED": "yes"})),
    );
    cluster.insert(owned_config_map("orphan"));

    let selector = LabelSelector::new().with(LABEL_APPLICATION, "demo");
    let options = DiffOptions::new("demo").with_prune(true);

    let before = cluster.read(NAMESPACE, &selector).await.unwrap();
    let result = diff(&desired, &before, &options);
    assert!(!result.is_empty());
    let errors = apply_diff(&cluster, &result, Duration::from_secs(5)).await;
    assert!(errors.is_empty());

    let after = cluster.read(NAMESPACE, &selector).await.unwrap();
    let rediff = diff(&desired, &after, &options);
    assert!(rediff.is_empty(), "expected convergence, got {rediff:?}");

    let settings = cluster
        .get(&ResourceId::new("ConfigMap", NAMESPACE, "settings"))
        .unwrap();
    assert_eq!(settings.field(&["data", "REMOVED"]), None);
}
