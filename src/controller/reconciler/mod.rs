//! # Reconciler
//!
//! Drives every registered application towards its desired state.
//!
//! Each application runs its own loop (`scheduler`). Every tick (`tick`)
//! renders the source, materializes external secrets, reads the owned live
//! objects, diffs, lets the sync state machine decide, applies (`apply`) when
//! authorized and records a Sync Run. Recorded status is persisted through the
//! state store and mirrored by an optional `StatusPublisher`.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, settings and tick errors
//! - `registry.rs` - Per-application handles and the registry
//! - `tick.rs` - One reconciliation pass
//! - `apply.rs` - Ordered execution of an authorized diff
//! - `scheduler.rs` - Per-application loops
//! - `status.rs` - Status publishing to `Application` resources
//! - `validation/` - Name, path and interval validation

pub mod apply;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod tick;
pub mod types;
pub mod validation;

pub use apply::apply_diff;
pub use registry::{ApplicationHandle, Registry};
pub use scheduler::{run_loop, spawn_loop};
pub use status::{KubeStatusPublisher, StatusPublisher};
pub use tick::run_tick;
pub use types::{Reconciler, ReconcilerSettings, TickError};
pub use validation::validate_application;
