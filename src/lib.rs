//! GitOps Reconciler Library
//!
//! Renders desired state from a source checkout, materializes external
//! secrets, diffs against the live cluster and applies under a sync policy.
//!
//! ## Quick Start
//!
//! ```rust
//! use gitops_reconciler::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provider;
pub mod runtime;
