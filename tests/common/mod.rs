//! Common test utilities
//!
//! Builds a reconciler wired to in-memory adapters and provides fixtures for
//! the "demo" application.

#![allow(dead_code, reason = "Each test binary uses a different subset of the helpers")]

use gitops_reconciler::cluster::InMemoryCluster;
use gitops_reconciler::constants::LABEL_APPLICATION;
use gitops_reconciler::controller::reconciler::{
    run_tick, ApplicationHandle, Reconciler, ReconcilerSettings,
};
use gitops_reconciler::controller::render::StaticRenderer;
use gitops_reconciler::controller::resource::ResourceObject;
use gitops_reconciler::controller::store::MemoryStore;
use gitops_reconciler::crd::{
    ApplicationSpec, Destination, SourceRef, SyncPolicy, SyncRun, TriggerSource, IN_CLUSTER,
};
use gitops_reconciler::provider::{InMemoryProvider, ProviderRegistry};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const REPO: &str = "/srv/deployments";
pub const PATH: &str = "apps/demo";
pub const ENVIRONMENT: &str = "dev";
pub const NAMESPACE: &str = "demo";

pub struct Harness {
    pub renderer: Arc<StaticRenderer>,
    pub cluster: Arc<InMemoryCluster>,
    pub provider: Arc<InMemoryProvider>,
    pub store: Arc<MemoryStore>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new() -> Self {
        let renderer = Arc::new(StaticRenderer::new());
        let cluster = Arc::new(InMemoryCluster::new());
        let provider = Arc::new(InMemoryProvider::new("vault"));
        let store = Arc::new(MemoryStore::new());
        let providers = Arc::new(ProviderRegistry::new().with(provider.clone()));

        let settings = ReconcilerSettings {
            call_timeout: Duration::from_secs(5),
            history_limit: 10,
            ..ReconcilerSettings::default()
        };
        let reconciler = Arc::new(Reconciler::new(
            renderer.clone(),
            cluster.clone(),
            providers,
            store.clone(),
            settings,
        ));

        Self {
            renderer,
            cluster,
            provider,
            store,
            reconciler,
        }
    }

    /// Serve `objects` as the rendered output of the demo source
    pub fn render(&self, objects: Vec<ResourceObject>) {
        self.renderer.set(REPO, PATH, ENVIRONMENT, objects);
    }

    pub fn handle(&self, policy: SyncPolicy) -> Arc<ApplicationHandle> {
        Arc::new(ApplicationHandle::new(
            "demo",
            demo_spec(policy),
            false,
            None,
            Vec::new(),
            Duration::from_secs(3600),
        ))
    }

    /// Run one tick to completion
    pub async fn tick(&self, handle: &ApplicationHandle, trigger: TriggerSource) -> SyncRun {
        run_tick(&self.reconciler, handle, trigger, &CancellationToken::new())
            .await
            .expect("tick should record a run")
    }
}

pub fn demo_spec(policy: SyncPolicy) -> ApplicationSpec {
    ApplicationSpec {
        source: SourceRef {
            repo_url: REPO.to_string(),
            path: PATH.to_string(),
            target_revision: None,
        },
        destination: Destination {
            cluster: IN_CLUSTER.to_string(),
            namespace: NAMESPACE.to_string(),
        },
        environment: ENVIRONMENT.to_string(),
        sync_policy: policy,
        reconcile_interval: None,
        secret_refresh_interval: None,
        suspend: false,
        cascade_delete: false,
    }
}

/// Rendered Deployment `d` with `replicas`
pub fn deployment(replicas: u64) -> ResourceObject {
    ResourceObject::new("apps/v1", "Deployment", "", "d").with_field(
        "spec",
        json!({
            "replicas": replicas,
            "template": {"spec": {"containers": [{"name": "web", "image": "nginx:1.27"}]}}
        }),
    )
}

/// Rendered Service `s`
pub fn service() -> ResourceObject {
    ResourceObject::new("v1", "Service", "", "s").with_field(
        "spec",
        json!({"ports": [{"port": 80, "targetPort": 8080}]}),
    )
}

/// Live ConfigMap owned by the demo application
pub fn owned_config_map(name: &str) -> ResourceObject {
    ResourceObject::new("v1", "ConfigMap", NAMESPACE, name)
        .with_label(LABEL_APPLICATION, "demo")
        .with_field("data", json!({"stale": "true"}))
}

/// Rendered `ExternalSecret` resolving `remote_key` from the `vault` provider
pub fn external_secret(name: &str, remote_key: &str) -> ResourceObject {
    ResourceObject::new("gitops-reconciler.io/v1alpha1", "ExternalSecret", "", name).with_field(
        "spec",
        json!({
            "data": [
                {"secretKey": "password", "remoteRef": {"provider": "vault", "key": remote_key}}
            ]
        }),
    )
}
