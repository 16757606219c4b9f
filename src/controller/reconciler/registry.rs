//! # Application Registry
//!
//! Live per-application state shared between the control surface and the
//! application loops.

use crate::controller::materializer::SecretCache;
use crate::controller::state_machine::SyncStateMachine;
use crate::crd::{ApplicationSpec, ApplicationStatus, SyncRun};
use crate::observability::metrics;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// State owned by the tick in progress; holding the lock marks the application busy
#[derive(Debug)]
pub struct AppRuntime {
    pub machine: SyncStateMachine,
    pub secret_cache: SecretCache,
}

/// One registered application
#[derive(Debug)]
pub struct ApplicationHandle {
    name: String,
    spec: RwLock<ApplicationSpec>,
    status: RwLock<ApplicationStatus>,
    history: RwLock<VecDeque<SyncRun>>,
    paused: AtomicBool,
    manual_requested: AtomicBool,
    wake: Notify,
    loop_token: CancellationToken,
    tick_token: Mutex<CancellationToken>,
    pub(crate) runtime: tokio::sync::Mutex<AppRuntime>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ApplicationHandle {
    /// Create a handle, resuming the state machine from `status` when present
    pub fn new(
        name: impl Into<String>,
        spec: ApplicationSpec,
        paused: bool,
        status: Option<ApplicationStatus>,
        history: Vec<SyncRun>,
        secret_ttl: Duration,
    ) -> Self {
        let machine = status
            .as_ref()
            .map_or_else(SyncStateMachine::new, SyncStateMachine::restore);
        let mut status = status.unwrap_or_default();
        status.paused = paused;
        let loop_token = CancellationToken::new();

        Self {
            name: name.into(),
            spec: RwLock::new(spec),
            status: RwLock::new(status),
            history: RwLock::new(history.into_iter().collect()),
            paused: AtomicBool::new(paused),
            manual_requested: AtomicBool::new(false),
            wake: Notify::new(),
            tick_token: Mutex::new(loop_token.child_token()),
            loop_token,
            runtime: tokio::sync::Mutex::new(AppRuntime {
                machine,
                secret_cache: SecretCache::new(secret_ttl),
            }),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn spec(&self) -> ApplicationSpec {
        self.spec
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the spec; the next tick picks it up
    pub fn set_spec(&self, spec: ApplicationSpec) {
        *self.spec.write().unwrap_or_else(PoisonError::into_inner) = spec;
        self.wake.notify_one();
    }

    #[must_use]
    pub fn status(&self) -> ApplicationStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sync Runs, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<SyncRun> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Pause or resume; pausing cancels the tick in flight
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.status
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .paused = paused;
        if paused {
            self.cancel_tick();
        } else {
            self.wake.notify_one();
        }
    }

    /// Ask the loop for an immediate manual tick
    pub fn request_sync(&self) {
        self.manual_requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Consume a pending manual request
    pub fn take_manual_request(&self) -> bool {
        self.manual_requested.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Token for a new tick; cancelled by pause, removal or shutdown
    ///
    /// Returned already cancelled when the application is paused. The flag is
    /// read under the token lock, so a concurrent `set_paused` cancels either
    /// this token or the one it replaces.
    pub(crate) fn begin_tick(&self) -> CancellationToken {
        let token = self.loop_token.child_token();
        let mut current = self
            .tick_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *current = token.clone();
        if self.is_paused() {
            token.cancel();
        }
        token
    }

    pub fn cancel_tick(&self) {
        self.tick_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub(crate) fn loop_token(&self) -> CancellationToken {
        self.loop_token.clone()
    }

    /// Stop the loop and any tick in flight
    pub fn stop(&self) {
        self.loop_token.cancel();
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Publish a tick's result: append the run and replace the status as one step
    pub(crate) fn record(&self, run: &SyncRun, mut status: ApplicationStatus, limit: usize) {
        status.paused = self.is_paused();
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
        history.push_back(run.clone());
        while history.len() > limit {
            history.pop_front();
        }
        *current = status;
    }
}

/// Registered applications by name
#[derive(Debug, Default)]
pub struct Registry {
    applications: tokio::sync::RwLock<BTreeMap<String, Arc<ApplicationHandle>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`; returns false if the name is taken
    pub async fn insert(&self, handle: Arc<ApplicationHandle>) -> bool {
        let mut applications = self.applications.write().await;
        if applications.contains_key(handle.name()) {
            return false;
        }
        applications.insert(handle.name().to_string(), handle);
        metrics::set_managed_applications(gauge_value(applications.len()));
        true
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ApplicationHandle>> {
        self.applications.read().await.get(name).cloned()
    }

    pub async fn remove(&self, name: &str) -> Option<Arc<ApplicationHandle>> {
        let mut applications = self.applications.write().await;
        let removed = applications.remove(name);
        metrics::set_managed_applications(gauge_value(applications.len()));
        removed
    }

    /// Handles sorted by name
    pub async fn list(&self) -> Vec<Arc<ApplicationHandle>> {
        self.applications.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.applications.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.applications.read().await.is_empty()
    }
}

fn gauge_value(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Destination, SourceRef, SyncOutcome, SyncPolicy, SyncState, TriggerSource};

    fn spec() -> ApplicationSpec {
        ApplicationSpec {
            source: SourceRef {
                repo_url: "/srv/deployments".to_string(),
                path: "apps/demo".to_string(),
                target_revision: None,
            },
            destination: Destination {
                cluster: crate::crd::IN_CLUSTER.to_string(),
                namespace: "demo".to_string(),
            },
            environment: "dev".to_string(),
            sync_policy: SyncPolicy::manual(),
            reconcile_interval: None,
            secret_refresh_interval: None,
            suspend: false,
            cascade_delete: false,
        }
    }

    fn handle(name: &str) -> Arc<ApplicationHandle> {
        Arc::new(ApplicationHandle::new(
            name,
            spec(),
            false,
            None,
            Vec::new(),
            Duration::from_secs(60),
        ))
    }

    #[test]
    fn test_manual_request_is_consumed_once() {
        let app = handle("demo");
        assert!(!app.take_manual_request());
        app.request_sync();
        assert!(app.take_manual_request());
        assert!(!app.take_manual_request());
    }

    #[test]
    fn test_pause_cancels_current_tick() {
        let app = handle("demo");
        let token = app.begin_tick();
        app.set_paused(true);
        assert!(token.is_cancelled());
        assert!(app.status().paused);

        app.set_paused(false);
        assert!(!app.begin_tick().is_cancelled());
    }

    #[test]
    fn test_tick_begun_while_paused_is_cancelled() {
        let app = handle("demo");
        app.set_paused(true);
        assert!(app.begin_tick().is_cancelled());
    }

    #[test]
    fn test_manual_request_survives_pause() {
        let app = handle("demo");
        app.request_sync();
        app.set_paused(true);
        app.set_paused(false);
        assert!(app.take_manual_request());
    }

    #[test]
    fn test_stop_cancels_loop_and_ticks() {
        let app = handle("demo");
        let token = app.begin_tick();
        app.stop();
        assert!(token.is_cancelled());
        assert!(app.loop_token().is_cancelled());
    }

    #[test]
    fn test_record_caps_history() {
        let app = handle("demo");
        for i in 0..5 {
            let run = SyncRun {
                id: format!("run-{i}"),
                trigger: TriggerSource::Timer,
                started_at: String::new(),
                finished_at: String::new(),
                desired_revision: None,
                diff_summary: None,
                policy: SyncPolicy::manual(),
                state: SyncState::OutOfSync,
                outcome: SyncOutcome::OutOfSync,
                apply_errors: Vec::new(),
                blocked: Vec::new(),
                error: None,
            };
            app.record(&run, ApplicationStatus::default(), 3);
        }
        let ids: Vec<String> = app.history().into_iter().map(|run| run.id).collect();
        assert_eq!(ids, vec!["run-2", "run-3", "run-4"]);
        assert_eq!(app.status().sync_state, SyncState::OutOfSync);
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicate_names_and_lists_sorted() {
        let registry = Registry::new();
        assert!(registry.insert(handle("web")).await);
        assert!(registry.insert(handle("api")).await);
        assert!(!registry.insert(handle("web")).await);

        let names: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|app| app.name().to_string())
            .collect();
        assert_eq!(names, vec!["api", "web"]);

        assert!(registry.remove("api").await.is_some());
        assert_eq!(registry.len().await, 1);
    }
}
