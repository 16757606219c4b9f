//! # Control Plane
//!
//! Operator-facing operations on applications: create, update, sync, pause,
//! resume, remove and the read-only status and history queries.
//!
//! Every mutation goes through the registry and is persisted through the
//! state store. Registered applications get their own loop; removal stops the
//! loop and waits for it before optionally deleting the managed objects.

use crate::config::ControllerConfig;
use crate::controller::reconciler::{
    spawn_loop, validate_application, ApplicationHandle, Reconciler, Registry,
};
use crate::controller::resource::ResourceId;
use crate::controller::store::ApplicationRecord;
use crate::crd::{ApplicationSpec, ApplicationStatus, SyncRun};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("application '{0}' not found")]
    NotFound(String),
    #[error("application '{0}' already exists")]
    AlreadyExists(String),
    #[error("invalid application: {0:#}")]
    Invalid(anyhow::Error),
    #[error("application '{0}' is paused")]
    Paused(String),
    #[error("cluster error: {0}")]
    Cluster(String),
    #[error("state store error: {0:#}")]
    Store(anyhow::Error),
}

/// Application as returned by the query operations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationView {
    pub name: String,
    pub spec: ApplicationSpec,
    pub paused: bool,
    pub status: ApplicationStatus,
}

impl ApplicationView {
    fn of(handle: &ApplicationHandle) -> Self {
        Self {
            name: handle.name().to_string(),
            spec: handle.spec(),
            paused: handle.is_paused(),
            status: handle.status(),
        }
    }
}

/// Objects removed by a cascading delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovalReport {
    pub deleted: Vec<ResourceId>,
    pub failed: Vec<ResourceId>,
}

#[derive(Debug)]
pub struct ControlPlane {
    reconciler: Arc<Reconciler>,
    registry: Arc<Registry>,
    config: ControllerConfig,
}

impl ControlPlane {
    pub fn new(reconciler: Arc<Reconciler>, registry: Arc<Registry>, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            registry,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register a new application and start its loop
    ///
    /// # Errors
    ///
    /// Fails on an invalid spec, a taken name or a store failure.
    pub async fn create_application(
        &self,
        name: &str,
        spec: ApplicationSpec,
    ) -> Result<ApplicationView, ControlError> {
        validate_application(name, &spec, &self.config).map_err(ControlError::Invalid)?;

        let handle = Arc::new(ApplicationHandle::new(
            name,
            spec.clone(),
            spec.suspend,
            None,
            Vec::new(),
            self.reconciler.secret_refresh_interval(&spec),
        ));
        if !self.registry.insert(Arc::clone(&handle)).await {
            return Err(ControlError::AlreadyExists(name.to_string()));
        }

        if let Err(e) = self.save(&handle).await {
            self.registry.remove(name).await;
            return Err(e);
        }

        info!(application = name, "application registered");
        spawn_loop(Arc::clone(&self.reconciler), Arc::clone(&handle));
        Ok(ApplicationView::of(&handle))
    }

    /// Replace the spec; the loop wakes and ticks against it
    ///
    /// # Errors
    ///
    /// Fails on an invalid spec, an unknown name or a store failure.
    pub async fn update_application(
        &self,
        name: &str,
        spec: ApplicationSpec,
    ) -> Result<ApplicationView, ControlError> {
        validate_application(name, &spec, &self.config).map_err(ControlError::Invalid)?;
        let handle = self.handle(name).await?;
        handle.set_spec(spec);
        self.save(&handle).await?;
        info!(application = name, "application updated");
        Ok(ApplicationView::of(&handle))
    }

    /// Create or update, following `spec.suspend` for the paused flag
    ///
    /// # Errors
    ///
    /// Fails on an invalid spec or a store failure.
    pub async fn upsert_application(
        &self,
        name: &str,
        spec: ApplicationSpec,
    ) -> Result<ApplicationView, ControlError> {
        let Some(handle) = self.registry.get(name).await else {
            return self.create_application(name, spec).await;
        };

        validate_application(name, &spec, &self.config).map_err(ControlError::Invalid)?;
        let suspend = spec.suspend;
        if handle.spec() != spec {
            handle.set_spec(spec);
        }
        if handle.is_paused() != suspend {
            handle.set_paused(suspend);
        }
        self.save(&handle).await?;
        Ok(ApplicationView::of(&handle))
    }

    /// Request one immediate manual tick
    ///
    /// # Errors
    ///
    /// Fails on an unknown or paused application.
    pub async fn sync_application(&self, name: &str) -> Result<(), ControlError> {
        let handle = self.handle(name).await?;
        if handle.is_paused() {
            return Err(ControlError::Paused(name.to_string()));
        }
        info!(application = name, "manual sync requested");
        handle.request_sync();
        Ok(())
    }

    /// Suspend ticks and cancel the tick in flight
    ///
    /// # Errors
    ///
    /// Fails on an unknown application or a store failure.
    pub async fn pause_application(&self, name: &str) -> Result<ApplicationView, ControlError> {
        let handle = self.handle(name).await?;
        handle.set_paused(true);
        self.save(&handle).await?;
        info!(application = name, "application paused");
        Ok(ApplicationView::of(&handle))
    }

    /// # Errors
    ///
    /// Fails on an unknown application or a store failure.
    pub async fn resume_application(&self, name: &str) -> Result<ApplicationView, ControlError> {
        let handle = self.handle(name).await?;
        handle.set_paused(false);
        self.save(&handle).await?;
        info!(application = name, "application resumed");
        Ok(ApplicationView::of(&handle))
    }

    /// Stop the loop and forget the application
    ///
    /// With `cascade` every live object carrying the application's ownership
    /// label is deleted afterwards. The application is removed even when the
    /// cascade fails.
    ///
    /// # Errors
    ///
    /// Fails on an unknown application, a store failure or an unreachable
    /// cluster during the cascade.
    pub async fn remove_application(
        &self,
        name: &str,
        cascade: bool,
    ) -> Result<RemovalReport, ControlError> {
        let handle = self
            .registry
            .remove(name)
            .await
            .ok_or_else(|| ControlError::NotFound(name.to_string()))?;

        handle.stop();
        if let Some(task) = handle.take_task() {
            if let Err(e) = task.await {
                warn!(application = name, "application loop ended abnormally: {}", e);
            }
        }

        self.reconciler
            .store
            .delete_application(name)
            .await
            .map_err(ControlError::Store)?;
        info!(application = name, cascade, "application removed");

        if !cascade {
            return Ok(RemovalReport::default());
        }
        self.cascade_delete(name, &handle.spec().destination.namespace)
            .await
    }

    async fn cascade_delete(&self, name: &str, namespace: &str) -> Result<RemovalReport, ControlError> {
        let live = self
            .reconciler
            .reader
            .read(name, namespace)
            .await
            .map_err(|e| ControlError::Cluster(e.to_string()))?;

        let call_timeout = self.reconciler.settings.call_timeout;
        let mut report = RemovalReport::default();
        for object in live {
            let id = object.id();
            match tokio::time::timeout(call_timeout, self.reconciler.cluster.delete(&id)).await {
                Ok(Ok(())) => report.deleted.push(id),
                Ok(Err(e)) => {
                    warn!(application = name, object = %id, "cascade delete failed: {}", e.message);
                    report.failed.push(id);
                }
                Err(_) => {
                    warn!(application = name, object = %id, "cascade delete timed out");
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Status as of the last completed tick
    ///
    /// # Errors
    ///
    /// Fails on an unknown application.
    pub async fn get_application_status(&self, name: &str) -> Result<ApplicationStatus, ControlError> {
        Ok(self.handle(name).await?.status())
    }

    /// # Errors
    ///
    /// Fails on an unknown application.
    pub async fn get_application(&self, name: &str) -> Result<ApplicationView, ControlError> {
        let handle = self.handle(name).await?;
        Ok(ApplicationView::of(&handle))
    }

    /// Every application, sorted by name
    pub async fn list_applications(&self) -> Vec<ApplicationView> {
        self.registry
            .list()
            .await
            .iter()
            .map(|handle| ApplicationView::of(handle.as_ref()))
            .collect()
    }

    /// Sync Runs of `name`, oldest first
    ///
    /// # Errors
    ///
    /// Fails on an unknown application.
    pub async fn get_history(&self, name: &str) -> Result<Vec<SyncRun>, ControlError> {
        Ok(self.handle(name).await?.history())
    }

    /// Re-register every application found in the state store
    ///
    /// Records that fail validation are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be read.
    pub async fn restore(&self) -> Result<usize, ControlError> {
        let records = self
            .reconciler
            .store
            .load_applications()
            .await
            .map_err(ControlError::Store)?;

        let mut restored = 0;
        for record in records {
            if let Err(e) = validate_application(&record.name, &record.spec, &self.config) {
                warn!(application = %record.name, "skipping stored application: {:#}", e);
                continue;
            }
            let history = match self.reconciler.store.load_history(&record.name).await {
                Ok(history) => history,
                Err(e) => {
                    warn!(application = %record.name, "failed to load history: {:#}", e);
                    Vec::new()
                }
            };

            let handle = Arc::new(ApplicationHandle::new(
                record.name.clone(),
                record.spec.clone(),
                record.paused,
                record.status,
                history,
                self.reconciler.secret_refresh_interval(&record.spec),
            ));
            if self.registry.insert(Arc::clone(&handle)).await {
                spawn_loop(Arc::clone(&self.reconciler), handle);
                restored += 1;
            }
        }

        info!(restored, "restored applications from state store");
        Ok(restored)
    }

    /// Stop every loop and wait for them to finish
    pub async fn shutdown(&self) {
        let handles = self.registry.list().await;
        for handle in &handles {
            handle.stop();
        }
        for handle in handles {
            if let Some(task) = handle.take_task() {
                if let Err(e) = task.await {
                    warn!(application = handle.name(), "application loop ended abnormally: {}", e);
                }
            }
        }
    }

    async fn handle(&self, name: &str) -> Result<Arc<ApplicationHandle>, ControlError> {
        self.registry
            .get(name)
            .await
            .ok_or_else(|| ControlError::NotFound(name.to_string()))
    }

    async fn save(&self, handle: &ApplicationHandle) -> Result<(), ControlError> {
        let status = handle.status();
        let record = ApplicationRecord {
            name: handle.name().to_string(),
            spec: handle.spec(),
            paused: handle.is_paused(),
            status: status.last_sync_run.is_some().then_some(status),
        };
        self.reconciler
            .store
            .save_application(&record)
            .await
            .map_err(ControlError::Store)
    }
}
