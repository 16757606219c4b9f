//! # Watch Loop
//!
//! Mirrors `Application` custom resources into the registry.
//!
//! - apply events create or update the application and follow `spec.suspend`
//! - a changed `gitops-reconciler.io/sync` annotation requests a manual sync
//! - delete events remove the application, cascading when `spec.cascadeDelete` is set

use crate::constants::ANNOTATION_SYNC_REQUEST;
use crate::controller::control::{ControlError, ControlPlane};
use crate::controller::reconciler::KubeStatusPublisher;
use crate::controller::server::ServerState;
use crate::crd::Application;
use futures::StreamExt;
use kube::api::Api;
use kube::Client;
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const WATCH_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Cancel the returned token on SIGINT/SIGTERM, marking the server not ready first
pub fn spawn_shutdown_handler(server_state: Arc<ServerState>) -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.is_ready.store(false, Ordering::Relaxed);
        token.cancel();
    });
    shutdown
}

/// Applies watch events to the control plane
#[derive(Debug)]
struct ApplicationMirror {
    control: Arc<ControlPlane>,
    publisher: Arc<KubeStatusPublisher>,
    /// Last seen value of the sync annotation per application
    sync_requests: HashMap<String, Option<String>>,
}

impl ApplicationMirror {
    async fn applied(&mut self, application: Application) {
        let Some(name) = application.metadata.name.clone() else {
            return;
        };
        let namespace = application
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let sync_value = application
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(ANNOTATION_SYNC_REQUEST))
            .cloned();

        self.publisher.track(&name, &namespace);
        if let Err(e) = self
            .control
            .upsert_application(&name, application.spec)
            .await
        {
            warn!(application = %name, namespace = %namespace, "Failed to register application: {}", e);
            return;
        }

        let previous = self.sync_requests.insert(name.clone(), sync_value.clone());
        let changed = matches!(&previous, Some(previous) if *previous != sync_value);
        if changed && sync_value.is_some() {
            match self.control.sync_application(&name).await {
                Ok(()) => info!(application = %name, "sync requested by annotation"),
                Err(ControlError::Paused(_)) => {
                    debug!(application = %name, "sync annotation ignored, application is suspended");
                }
                Err(e) => warn!(application = %name, "Failed to request sync: {}", e),
            }
        }
    }

    async fn deleted(&mut self, application: Application) {
        let Some(name) = application.metadata.name.clone() else {
            return;
        };
        self.sync_requests.remove(&name);
        self.publisher.forget(&name);

        match self
            .control
            .remove_application(&name, application.spec.cascade_delete)
            .await
        {
            Ok(report) => info!(
                application = %name,
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                "application resource deleted"
            ),
            Err(ControlError::NotFound(_)) => {}
            Err(e) => warn!(application = %name, "Failed to remove application: {}", e),
        }
    }
}

/// Watch `Application` resources in all namespaces until `shutdown` is cancelled
///
/// # Errors
///
/// Currently never fails; watch errors are logged and the watch restarts.
pub async fn run_watch_loop(
    client: Client,
    control: Arc<ControlPlane>,
    publisher: Arc<KubeStatusPublisher>,
    shutdown: CancellationToken,
) -> Result<(), anyhow::Error> {
    let applications: Api<Application> = Api::all(client);
    let mut mirror = ApplicationMirror {
        control,
        publisher,
        sync_requests: HashMap::new(),
    };

    info!("Starting Application watch loop...");
    while !shutdown.is_cancelled() {
        let mut events = watcher(applications.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                Some(Ok(watcher::Event::Apply(application) | watcher::Event::InitApply(application))) => {
                    mirror.applied(application).await;
                }
                Some(Ok(watcher::Event::Delete(application))) => mirror.deleted(application).await,
                Some(Ok(watcher::Event::Init)) => debug!("watch.init"),
                Some(Ok(watcher::Event::InitDone)) => debug!("watch.init.done"),
                Some(Err(e)) => warn!("Application watch error: {}", e),
                None => {
                    warn!(
                        "Application watch stream ended, restarting in {} seconds...",
                        WATCH_RESTART_DELAY.as_secs()
                    );
                    break;
                }
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => {}
            () = tokio::time::sleep(WATCH_RESTART_DELAY) => {}
        }
    }

    info!("Application watch loop stopped");
    Ok(())
}
