//! # Custom Resource Definitions
//!
//! Types describing an Application: what to render, where to apply it, how to
//! sync it, and the status the reconciler records for it.
//!
//! ## Module Structure
//!
//! - `spec.rs` - The `Application` custom resource and its spec
//! - `source.rs` - Source and destination references
//! - `policy.rs` - Sync policy
//! - `status.rs` - Status, Sync Runs and diff summaries

mod policy;
mod source;
mod spec;
mod status;

pub use policy::{SyncMode, SyncPolicy};
pub use source::{default_cluster, Destination, SourceRef, IN_CLUSTER};
pub use spec::{Application, ApplicationSpec};
pub use status::{
    ApplicationStatus, ApplyAction, BlockedObject, Condition, DiffSummary, ObjectError,
    OutOfSyncCause, SyncOutcome, SyncRun, SyncState, TriggerSource,
};
