//! # Scheduler
//!
//! One tokio task per application. The task ticks on the application's
//! reconcile interval and wakes early for manual sync requests, spec updates
//! and resumes. Ticks of one application never overlap; different
//! applications run concurrently.

use crate::controller::reconciler::registry::ApplicationHandle;
use crate::controller::reconciler::tick::run_tick;
use crate::controller::reconciler::types::Reconciler;
use crate::crd::TriggerSource;
use std::sync::Arc;
use tracing::{debug, info};

/// Spawn the loop of `handle` and remember its task on the handle
pub fn spawn_loop(reconciler: Arc<Reconciler>, handle: Arc<ApplicationHandle>) {
    let task = tokio::spawn(run_loop(reconciler, Arc::clone(&handle)));
    handle.set_task(task);
}

/// Tick `handle` until its loop token is cancelled
pub async fn run_loop(reconciler: Arc<Reconciler>, handle: Arc<ApplicationHandle>) {
    let loop_token = handle.loop_token();
    let mut next_trigger = TriggerSource::Initial;
    info!(application = handle.name(), "application loop started");

    while !loop_token.is_cancelled() {
        // A sync requested just before a pause stays pending until resume
        if handle.is_paused() {
            debug!(application = handle.name(), "paused, skipping tick");
        } else {
            let trigger = if handle.take_manual_request() {
                TriggerSource::Manual
            } else {
                next_trigger
            };
            let tick_token = handle.begin_tick();
            run_tick(&reconciler, &handle, trigger, &tick_token).await;
            next_trigger = TriggerSource::Timer;
        }

        let interval = reconciler.reconcile_interval(&handle.spec());
        tokio::select! {
            () = loop_token.cancelled() => break,
            () = handle.notified() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }

    info!(application = handle.name(), "application loop stopped");
}
