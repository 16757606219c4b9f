//! # Sync Policy
//!
//! Controls whether and how a computed diff is applied.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// When diffs are applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum SyncMode {
    /// Diffs are computed every tick but only applied on an explicit sync request
    #[default]
    Manual,
    /// Diffs caused by desired-state changes are applied as soon as they are detected
    Automated,
}

/// Sync policy of an application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default)]
    pub mode: SyncMode,
    /// Revert out-of-band drift even when desired state did not change
    /// Only effective in `Automated` mode
    #[serde(default)]
    pub self_heal: bool,
    /// Delete live objects that carry the ownership label but are no longer desired
    #[serde(default)]
    pub prune: bool,
}

impl SyncPolicy {
    #[must_use]
    pub fn manual() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn automated() -> Self {
        Self {
            mode: SyncMode::Automated,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_self_heal(mut self, self_heal: bool) -> Self {
        self.self_heal = self_heal;
        self
    }

    #[must_use]
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    #[must_use]
    pub fn is_automated(&self) -> bool {
        self.mode == SyncMode::Automated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_defaults_to_manual_without_prune() {
        let policy: SyncPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, SyncPolicy::manual());
        assert!(!policy.is_automated());
        assert!(!policy.prune);
        assert!(!policy.self_heal);
    }

    #[test]
    fn test_policy_deserializes_camel_case() {
        let policy: SyncPolicy =
            serde_json::from_str(r#"{"mode":"Automated","selfHeal":true,"prune":true}"#).unwrap();
        assert_eq!(
            policy,
            SyncPolicy::automated().with_self_heal(true).with_prune(true)
        );
    }
}
