//! # Tick
//!
//! One reconciliation pass of one application:
//!
//! 1. Render the source with the environment overlay
//! 2. Normalize (default namespace, duplicate check, ownership label)
//! 3. Materialize external secrets, then check identities and managed kinds
//! 4. Read owned live objects
//! 5. Diff and feed the result to the sync state machine
//! 6. Apply when authorized
//! 7. Record the Sync Run, persist it and publish the status
//!
//! Cancellation is checked between steps and never during an apply batch.

use crate::controller::diff::{diff, DiffOptions, DiffResult};
use crate::controller::materializer::MaterializedSet;
use crate::controller::reconciler::apply::apply_diff;
use crate::controller::reconciler::registry::{AppRuntime, ApplicationHandle};
use crate::controller::reconciler::types::{Reconciler, TickError};
use crate::controller::render::{normalize, reject_unmanaged_kinds, RenderError};
use crate::controller::resource::desired_revision;
use crate::controller::state_machine::Decision;
use crate::controller::store::ApplicationRecord;
use crate::crd::{
    ApplicationSpec, ApplicationStatus, ObjectError, SyncOutcome, SyncRun, SyncState,
    TriggerSource,
};
use crate::observability::metrics;
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// What a completed tick decided and did
struct TickReport {
    revision: String,
    diff: DiffResult,
    materialized: MaterializedSet,
    decision: Decision,
    apply_errors: Vec<ObjectError>,
}

/// Run one tick of `handle`
///
/// Returns the recorded Sync Run, or `None` when the tick was cancelled or
/// another tick of the same application is still running.
pub async fn run_tick(
    reconciler: &Reconciler,
    handle: &ApplicationHandle,
    trigger: TriggerSource,
    token: &CancellationToken,
) -> Option<SyncRun> {
    let Ok(mut runtime) = handle.runtime.try_lock() else {
        debug!(application = handle.name(), "tick already in progress, skipping");
        return None;
    };

    let spec = handle.spec();
    let span = tracing::info_span!(
        "reconcile.tick",
        application = handle.name(),
        namespace = %spec.destination.namespace,
        trigger = trigger.as_str(),
    );

    async move {
        let started_at = chrono::Utc::now();
        let start = Instant::now();
        metrics::increment_ticks();

        let result = execute(reconciler, handle.name(), &spec, trigger, token, &mut runtime).await;
        metrics::observe_tick_duration(start.elapsed().as_secs_f64());

        let previous = handle.status();
        let (run, status) = match result {
            Ok(report) => {
                let run = completed_run(&report, &spec, trigger, &runtime, started_at);
                let status = completed_status(&report, &runtime, &run);
                info!(
                    state = %run.state,
                    outcome = ?run.outcome,
                    to_create = report.diff.to_create.len(),
                    to_update = report.diff.to_update.len(),
                    to_delete = report.diff.to_delete.len(),
                    blocked = report.materialized.blocked.len(),
                    "tick complete"
                );
                (run, status)
            }
            Err(TickError::Cancelled) => {
                info!("tick cancelled");
                return None;
            }
            Err(e) => {
                warn!("tick failed: {}", e);
                metrics::increment_tick_errors();
                let run = failed_run(&e, &spec, trigger, &runtime, started_at);
                let status = failed_status(previous, &run, &e);
                (run, status)
            }
        };
        drop(runtime);

        let limit = reconciler.settings.history_limit;
        handle.record(&run, status.clone(), limit);
        persist(reconciler, handle, &spec, &run, &status).await;
        Some(run)
    }
    .instrument(span)
    .await
}

async fn execute(
    reconciler: &Reconciler,
    application: &str,
    spec: &ApplicationSpec,
    trigger: TriggerSource,
    token: &CancellationToken,
    runtime: &mut AppRuntime,
) -> Result<TickReport, TickError> {
    let AppRuntime {
        machine,
        secret_cache,
    } = runtime;
    let call_timeout = reconciler.settings.call_timeout;
    let namespace = spec.destination.namespace.as_str();

    secret_cache.set_ttl(reconciler.secret_refresh_interval(spec));
    secret_cache.begin_tick(tokio::time::Instant::now());

    let rendered = step(token, async {
        let objects = tokio::time::timeout(
            call_timeout,
            reconciler.renderer.render(
                &spec.source.repo_url,
                &spec.source.path,
                &spec.environment,
            ),
        )
        .await
        .map_err(|_| RenderError::Timeout(call_timeout.as_secs()))??;
        Ok::<_, TickError>(objects)
    })
    .await?;

    let desired = normalize(rendered, application, namespace)?;

    let materialized = step(token, async {
        Ok::<_, TickError>(reconciler.materializer.materialize(desired, secret_cache).await?)
    })
    .await?;
    if let Some(id) = materialized.duplicate_identity() {
        return Err(RenderError::DuplicateIdentity(id).into());
    }
    reject_unmanaged_kinds(&materialized.objects, &reconciler.settings.managed_kinds)?;
    let revision = desired_revision(&materialized.objects);

    let live = step(token, async {
        Ok::<_, TickError>(reconciler.reader.read(application, namespace).await?)
    })
    .await?;

    let protected: BTreeSet<_> = materialized.blocked.iter().map(|b| b.id.clone()).collect();
    let options = DiffOptions::new(application)
        .with_prune(spec.sync_policy.prune)
        .with_protected(protected);
    let diff = diff(&materialized.objects, &live, &options);

    if token.is_cancelled() {
        return Err(TickError::Cancelled);
    }

    let was_synced = machine.state() == SyncState::Synced;
    let decision = machine.observe(
        &revision,
        diff.is_empty(),
        spec.sync_policy,
        trigger == TriggerSource::Manual,
    );
    if was_synced && machine.is_drift() {
        info!(revision = %revision, "drift detected");
        metrics::increment_drift_detections();
    }

    let apply_errors = if decision == Decision::Apply {
        let errors = apply_diff(reconciler.cluster.as_ref(), &diff, call_timeout).await;
        machine.complete(&revision, errors.is_empty());
        errors
    } else {
        Vec::new()
    };

    Ok(TickReport {
        revision,
        diff,
        materialized,
        decision,
        apply_errors,
    })
}

/// Race `fut` against cancellation of the tick
async fn step<T, F>(token: &CancellationToken, fut: F) -> Result<T, TickError>
where
    F: Future<Output = Result<T, TickError>>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(TickError::Cancelled),
        result = fut => result,
    }
}

fn completed_run(
    report: &TickReport,
    spec: &ApplicationSpec,
    trigger: TriggerSource,
    runtime: &AppRuntime,
    started_at: chrono::DateTime<chrono::Utc>,
) -> SyncRun {
    let outcome = match report.decision {
        Decision::InSync => SyncOutcome::Synced,
        Decision::Defer => SyncOutcome::OutOfSync,
        Decision::Apply if report.apply_errors.is_empty() => SyncOutcome::Succeeded,
        Decision::Apply => SyncOutcome::Failed,
    };
    SyncRun {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        started_at: started_at.to_rfc3339(),
        finished_at: chrono::Utc::now().to_rfc3339(),
        desired_revision: Some(report.revision.clone()),
        diff_summary: Some(report.diff.summary()),
        policy: spec.sync_policy,
        state: runtime.machine.state(),
        outcome,
        apply_errors: report.apply_errors.clone(),
        blocked: report.materialized.blocked.clone(),
        error: None,
    }
}

fn failed_run(
    error: &TickError,
    spec: &ApplicationSpec,
    trigger: TriggerSource,
    runtime: &AppRuntime,
    started_at: chrono::DateTime<chrono::Utc>,
) -> SyncRun {
    SyncRun {
        id: uuid::Uuid::new_v4().to_string(),
        trigger,
        started_at: started_at.to_rfc3339(),
        finished_at: chrono::Utc::now().to_rfc3339(),
        desired_revision: None,
        diff_summary: None,
        policy: spec.sync_policy,
        state: runtime.machine.state(),
        outcome: SyncOutcome::Failed,
        apply_errors: Vec::new(),
        blocked: Vec::new(),
        error: Some(error.to_string()),
    }
}

fn completed_status(report: &TickReport, runtime: &AppRuntime, run: &SyncRun) -> ApplicationStatus {
    let state = runtime.machine.state();
    let blocked_ids: BTreeSet<_> = report.materialized.blocked.iter().map(|b| &b.id).collect();
    let message = match state {
        SyncState::Degraded => Some(format!("{} object(s) failed to apply", report.apply_errors.len())),
        SyncState::OutOfSync => Some("diff awaiting sync".to_string()),
        _ if !report.materialized.blocked.is_empty() => Some(format!(
            "{} object(s) blocked by secret providers",
            report.materialized.blocked.len()
        )),
        _ => None,
    };

    ApplicationStatus {
        sync_state: state,
        out_of_sync_cause: runtime.machine.cause(),
        paused: false,
        synced_revision: runtime.machine.synced_revision().map(ToString::to_string),
        last_sync_run: Some(run.clone()),
        diff_summary: run.diff_summary,
        blocked: report.materialized.blocked.clone(),
        failed: report.apply_errors.clone(),
        retained_orphans: report
            .diff
            .retained_orphans
            .iter()
            .filter(|id| !blocked_ids.contains(id))
            .cloned()
            .collect(),
        conditions: vec![ApplicationStatus::ready_condition(state, message)],
        last_reconcile_time: Some(run.finished_at.clone()),
    }
}

/// Keep the last good comparison, attach the failed run
fn failed_status(mut previous: ApplicationStatus, run: &SyncRun, error: &TickError) -> ApplicationStatus {
    let mut condition = ApplicationStatus::ready_condition(previous.sync_state, Some(error.to_string()));
    condition.status = "False".to_string();
    condition.reason = Some(
        match error {
            TickError::Render(_) => "RenderFailed",
            TickError::InvalidSecret(_) => "InvalidExternalSecret",
            TickError::Cluster(_) => "ClusterUnreachable",
            TickError::Cancelled => "Cancelled",
        }
        .to_string(),
    );
    previous.last_sync_run = Some(run.clone());
    previous.conditions = vec![condition];
    previous.last_reconcile_time = Some(run.finished_at.clone());
    previous
}

async fn persist(
    reconciler: &Reconciler,
    handle: &ApplicationHandle,
    spec: &ApplicationSpec,
    run: &SyncRun,
    status: &ApplicationStatus,
) {
    let name = handle.name();
    if let Err(e) = reconciler
        .store
        .append_run(name, run, reconciler.settings.history_limit)
        .await
    {
        warn!("Failed to persist sync run for {}: {:#}", name, e);
    }

    let record = ApplicationRecord {
        name: name.to_string(),
        spec: spec.clone(),
        paused: handle.is_paused(),
        status: Some(status.clone()),
    };
    if let Err(e) = reconciler.store.save_application(&record).await {
        warn!("Failed to persist status for {}: {:#}", name, e);
    }

    if let Some(publisher) = &reconciler.publisher {
        if let Err(e) = publisher.publish(name, status).await {
            warn!("Failed to publish status for {}: {:#}", name, e);
        }
    }
}
