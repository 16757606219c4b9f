//! # GitOps Reconciler
//!
//! Keeps Kubernetes namespaces converged on manifests rendered from source
//! checkouts.
//!
//! ## Overview
//!
//! For every registered application the reconciler periodically:
//!
//! 1. **Renders** the source path with the environment overlay (`kustomize build`)
//! 2. **Materializes** `ExternalSecret` objects into Secrets from the secret providers
//! 3. **Reads** the live objects carrying the application's ownership label
//! 4. **Diffs** desired against live state
//! 5. **Applies** the diff when the sync policy authorizes it
//!
//! Applications are registered through the HTTP control surface or as
//! `Application` custom resources.
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for configuration and examples.

use anyhow::Result;
use gitops_reconciler::runtime::initialization::initialize;
use gitops_reconciler::runtime::watch_loop::{run_watch_loop, spawn_shutdown_handler};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    let shutdown = spawn_shutdown_handler(Arc::clone(&init.server_state));

    if init.config.watch_application_crds {
        run_watch_loop(
            init.client.clone(),
            Arc::clone(&init.control),
            Arc::clone(&init.publisher),
            shutdown.clone(),
        )
        .await?;
    } else {
        info!("Application resource watch disabled, serving the control surface only");
        shutdown.cancelled().await;
    }

    info!("Waiting for application loops to stop...");
    init.control.shutdown().await;
    info!("Reconciler stopped gracefully");
    Ok(())
}
