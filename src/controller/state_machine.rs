//! # Sync Policy State Machine
//!
//! Decides, once per tick, whether a computed diff is applied.
//!
//! ```text
//!            diff empty (any state but Syncing)
//!   ┌──────────────────────────────────────────────► Synced
//!   │                                                  │ drift, same revision
//!   │        revision changed (any state)              ▼
//! OutOfSync ◄───────────────────────────────────── OutOfSync(Drift)
//!   │ authorized
//!   ▼
//! Syncing ──all calls ok──► Synced
//!   └──────any call failed─► Degraded ── automated: retried next tick
//! ```
//!
//! Apply is authorized by an explicit trigger in any mode. In automated mode
//! it is also authorized when the desired revision changed, when self-heal is
//! on, or when retrying from `Degraded`.

use crate::crd::{ApplicationStatus, OutOfSyncCause, SyncPolicy, SyncState};

/// What the reconciler should do with this tick's diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Live state already matches
    InSync,
    /// Apply the diff now
    Apply,
    /// Record the diff and wait
    Defer,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStateMachine {
    state: SyncState,
    cause: Option<OutOfSyncCause>,
    /// Revision of the desired set live state last matched
    synced_revision: Option<String>,
    /// Revision seen by the previous tick
    observed_revision: Option<String>,
}

impl SyncStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from a persisted status
    #[must_use]
    pub fn restore(status: &ApplicationStatus) -> Self {
        let state = match status.sync_state {
            // A tick interrupted mid-apply is retried as a desired change
            SyncState::Syncing => SyncState::OutOfSync,
            other => other,
        };
        Self {
            state,
            cause: status.out_of_sync_cause,
            synced_revision: status.synced_revision.clone(),
            observed_revision: status
                .last_sync_run
                .as_ref()
                .and_then(|run| run.desired_revision.clone()),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.state
    }

    #[must_use]
    pub fn cause(&self) -> Option<OutOfSyncCause> {
        self.cause
    }

    #[must_use]
    pub fn synced_revision(&self) -> Option<&str> {
        self.synced_revision.as_deref()
    }

    /// Feed one tick's comparison result into the machine
    ///
    /// `manual` is true when the tick was started by an explicit sync request.
    pub fn observe(
        &mut self,
        revision: &str,
        diff_is_empty: bool,
        policy: SyncPolicy,
        manual: bool,
    ) -> Decision {
        let previous = self.state;
        let revision_changed = self.observed_revision.as_deref() != Some(revision)
            || self.synced_revision.is_none();
        self.observed_revision = Some(revision.to_string());

        if diff_is_empty {
            self.state = SyncState::Synced;
            self.cause = None;
            self.synced_revision = Some(revision.to_string());
            return Decision::InSync;
        }

        if revision_changed {
            self.cause = Some(OutOfSyncCause::DesiredChanged);
        } else if previous == SyncState::Synced || self.cause.is_none() {
            self.cause = Some(OutOfSyncCause::Drift);
        }

        let authorized = manual
            || (policy.is_automated()
                && (self.cause == Some(OutOfSyncCause::DesiredChanged)
                    || policy.self_heal
                    || previous == SyncState::Degraded));

        if authorized {
            self.state = SyncState::Syncing;
            Decision::Apply
        } else {
            self.state = SyncState::OutOfSync;
            Decision::Defer
        }
    }

    /// Record the result of an authorized apply
    pub fn complete(&mut self, revision: &str, all_succeeded: bool) {
        if all_succeeded {
            self.state = SyncState::Synced;
            self.cause = None;
            self.synced_revision = Some(revision.to_string());
        } else {
            self.state = SyncState::Degraded;
        }
    }

    /// True when this transition found drift on an unchanged desired set
    #[must_use]
    pub fn is_drift(&self) -> bool {
        self.cause == Some(OutOfSyncCause::Drift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_diff_is_synced() {
        let mut machine = SyncStateMachine::new();
        assert_eq!(
            machine.observe("r1", true, SyncPolicy::manual(), false),
            Decision::InSync
        );
        assert_eq!(machine.state(), SyncState::Synced);
        assert_eq!(machine.synced_revision(), Some("r1"));
    }

    #[test]
    fn test_manual_mode_waits_for_trigger() {
        let mut machine = SyncStateMachine::new();
        assert_eq!(
            machine.observe("r1", false, SyncPolicy::manual(), false),
            Decision::Defer
        );
        assert_eq!(machine.state(), SyncState::OutOfSync);
        assert_eq!(machine.cause(), Some(OutOfSyncCause::DesiredChanged));

        // Still waiting on the next timer tick
        assert_eq!(
            machine.observe("r1", false, SyncPolicy::manual(), false),
            Decision::Defer
        );

        assert_eq!(
            machine.observe("r1", false, SyncPolicy::manual(), true),
            Decision::Apply
        );
        assert_eq!(machine.state(), SyncState::Syncing);
        machine.complete("r1", true);
        assert_eq!(machine.state(), SyncState::Synced);
    }

    #[test]
    fn test_automated_applies_desired_changes() {
        let mut machine = SyncStateMachine::new();
        let policy = SyncPolicy::automated();
        assert_eq!(machine.observe("r1", false, policy, false), Decision::Apply);
        machine.complete("r1", true);
        assert_eq!(machine.observe("r2", false, policy, false), Decision::Apply);
        assert_eq!(machine.cause(), Some(OutOfSyncCause::DesiredChanged));
    }

    #[test]
    fn test_drift_without_self_heal_is_recorded() {
        let mut machine = SyncStateMachine::new();
        let policy = SyncPolicy::automated();
        machine.observe("r1", false, policy, false);
        machine.complete("r1", true);

        assert_eq!(machine.observe("r1", false, policy, false), Decision::Defer);
        assert_eq!(machine.state(), SyncState::OutOfSync);
        assert!(machine.is_drift());

        assert_eq!(machine.observe("r1", false, policy, false), Decision::Defer);
        assert!(machine.is_drift());
    }

    #[test]
    fn test_drift_with_self_heal_resyncs() {
        let mut machine = SyncStateMachine::new();
        let policy = SyncPolicy::automated().with_self_heal(true);
        machine.observe("r1", false, policy, false);
        machine.complete("r1", true);

        assert_eq!(machine.observe("r1", false, policy, false), Decision::Apply);
        assert!(machine.is_drift());
        assert_eq!(machine.state(), SyncState::Syncing);
    }

    #[test]
    fn test_degraded_retries_only_when_automated() {
        let mut automated = SyncStateMachine::new();
        automated.observe("r1", false, SyncPolicy::automated(), false);
        automated.complete("r1", false);
        assert_eq!(automated.state(), SyncState::Degraded);
        assert_eq!(
            automated.observe("r1", false, SyncPolicy::automated(), false),
            Decision::Apply
        );

        let mut manual = SyncStateMachine::new();
        manual.observe("r1", false, SyncPolicy::manual(), true);
        manual.complete("r1", false);
        assert_eq!(
            manual.observe("r1", false, SyncPolicy::manual(), false),
            Decision::Defer
        );
    }

    #[test]
    fn test_revision_change_overrides_drift() {
        let mut machine = SyncStateMachine::new();
        let policy = SyncPolicy::automated();
        machine.observe("r1", false, policy, false);
        machine.complete("r1", true);
        machine.observe("r1", false, policy, false);
        assert!(machine.is_drift());

        assert_eq!(machine.observe("r2", false, policy, false), Decision::Apply);
        assert_eq!(machine.cause(), Some(OutOfSyncCause::DesiredChanged));
    }

    #[test]
    fn test_restore_from_status() {
        let status = ApplicationStatus {
            sync_state: SyncState::Syncing,
            synced_revision: Some("r1".to_string()),
            ..ApplicationStatus::default()
        };
        let machine = SyncStateMachine::restore(&status);
        assert_eq!(machine.state(), SyncState::OutOfSync);
        assert_eq!(machine.synced_revision(), Some("r1"));
    }
}
