//! # Application Status
//!
//! Status types recorded by the reconciler: the sync state, the last Sync Run,
//! and the objects that are currently blocked or failing.

use crate::controller::resource::ResourceId;
use crate::crd::SyncPolicy;
use crate::provider::ProviderErrorKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sync state of an application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum SyncState {
    /// Live state differs from desired state (or has not been compared yet)
    #[default]
    OutOfSync,
    /// An authorized diff is being applied
    Syncing,
    /// Live state matches desired state
    Synced,
    /// The last apply left one or more objects failed
    Degraded,
}

impl SyncState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::OutOfSync => "OutOfSync",
            SyncState::Syncing => "Syncing",
            SyncState::Synced => "Synced",
            SyncState::Degraded => "Degraded",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an application is out of sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum OutOfSyncCause {
    /// Rendered desired state changed since the last sync
    DesiredChanged,
    /// Live state changed out-of-band while desired state stayed the same
    Drift,
}

/// Why a tick ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerSource {
    /// First tick after the application was registered
    Initial,
    /// Periodic tick on the reconcile interval
    Timer,
    /// Explicit sync request through the control surface
    Manual,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Initial => "initial",
            TriggerSource::Timer => "timer",
            TriggerSource::Manual => "manual",
        }
    }
}

/// Outcome of one Sync Run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SyncOutcome {
    /// A diff was applied and every call succeeded
    Succeeded,
    /// The tick aborted, or at least one apply call failed
    Failed,
    /// A diff exists but the policy deferred it
    OutOfSync,
    /// Nothing to apply
    Synced,
}

/// Apply action attempted for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ApplyAction {
    Create,
    Update,
    Delete,
}

impl ApplyAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyAction::Create => "create",
            ApplyAction::Update => "update",
            ApplyAction::Delete => "delete",
        }
    }
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of a diff; the diff itself is never persisted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub to_create: usize,
    pub to_update: usize,
    pub to_delete: usize,
    /// Orphaned objects kept because pruning is disabled
    pub retained_orphans: usize,
    /// Matched objects without differences
    pub in_sync: usize,
}

impl DiffSummary {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_delete > 0
    }
}

/// Desired object excluded from a tick because its secret references could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockedObject {
    pub id: ResourceId,
    pub reason: ProviderErrorKind,
    pub message: String,
}

/// Apply, update or delete call that failed for one object
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectError {
    pub id: ResourceId,
    pub action: ApplyAction,
    pub message: String,
}

/// One reconciliation attempt; immutable once recorded
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: String,
    pub trigger: TriggerSource,
    /// RFC3339
    pub started_at: String,
    /// RFC3339
    pub finished_at: String,
    /// Fingerprint of the desired set the tick worked from
    #[serde(default)]
    pub desired_revision: Option<String>,
    #[serde(default)]
    pub diff_summary: Option<DiffSummary>,
    pub policy: SyncPolicy,
    /// State machine state after the tick
    pub state: SyncState,
    pub outcome: SyncOutcome,
    #[serde(default)]
    pub apply_errors: Vec<ObjectError>,
    #[serde(default)]
    pub blocked: Vec<BlockedObject>,
    /// Tick-level failure (render error, cluster unreachable, timeout)
    #[serde(default)]
    pub error: Option<String>,
}

/// Condition represents a status condition for the resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of condition (True, False, Unknown)
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Status of an application as of its last completed tick
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    pub sync_state: SyncState,
    #[serde(default)]
    pub out_of_sync_cause: Option<OutOfSyncCause>,
    #[serde(default)]
    pub paused: bool,
    /// Fingerprint of the desired set last applied successfully
    #[serde(default)]
    pub synced_revision: Option<String>,
    #[serde(default)]
    pub last_sync_run: Option<SyncRun>,
    #[serde(default)]
    pub diff_summary: Option<DiffSummary>,
    #[serde(default)]
    pub blocked: Vec<BlockedObject>,
    #[serde(default)]
    pub failed: Vec<ObjectError>,
    #[serde(default)]
    pub retained_orphans: Vec<ResourceId>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// RFC3339
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
}

impl ApplicationStatus {
    /// Ready condition derived from the sync state
    #[must_use]
    pub fn ready_condition(state: SyncState, message: Option<String>) -> Condition {
        let (status, reason) = match state {
            SyncState::Synced => ("True", "Synced"),
            SyncState::Syncing => ("False", "SyncInProgress"),
            SyncState::OutOfSync => ("False", "OutOfSync"),
            SyncState::Degraded => ("False", "ApplyFailed"),
        };
        Condition {
            r#type: "Ready".to_string(),
            status: status.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_out_of_sync() {
        let status = ApplicationStatus::default();
        assert_eq!(status.sync_state, SyncState::OutOfSync);
        assert!(status.last_sync_run.is_none());
    }

    #[test]
    fn test_ready_condition_reflects_state() {
        let ready = ApplicationStatus::ready_condition(SyncState::Synced, None);
        assert_eq!(ready.status, "True");
        let degraded =
            ApplicationStatus::ready_condition(SyncState::Degraded, Some("1 failed".into()));
        assert_eq!(degraded.status, "False");
        assert_eq!(degraded.reason.as_deref(), Some("ApplyFailed"));
        assert_eq!(degraded.message.as_deref(), Some("1 failed"));
    }

    #[test]
    fn test_trigger_source_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&TriggerSource::Manual).unwrap(),
            "\"manual\""
        );
        assert_eq!(TriggerSource::Timer.as_str(), "timer");
    }

    #[test]
    fn test_diff_summary_has_changes() {
        assert!(!DiffSummary::default().has_changes());
        let summary = DiffSummary {
            retained_orphans: 2,
            in_sync: 4,
            ..DiffSummary::default()
        };
        assert!(!summary.has_changes());
        assert!(DiffSummary {
            to_delete: 1,
            ..DiffSummary::default()
        }
        .has_changes());
    }
}
