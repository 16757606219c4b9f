//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use gitops_reconciler::prelude::*;
//! ```

// CRD types - most commonly used
pub use crate::crd::*;

// Ports - needed for implementing adapters
pub use crate::cluster::{ClusterClient, ClusterError};
pub use crate::controller::reconciler::StatusPublisher;
pub use crate::controller::render::Renderer;
pub use crate::controller::store::StateStore;
pub use crate::provider::{ProviderError, SecretProvider, SecretValue};

// Core types
pub use crate::controller::control::{ControlError, ControlPlane};
pub use crate::controller::reconciler::{Reconciler, ReconcilerSettings, Registry};
pub use crate::controller::resource::{ResourceId, ResourceObject};

pub use crate::config::ControllerConfig;
