//! # Controller
//!
//! Core modules of the GitOps reconciler.
//!
//! - `resource`: Resource objects, identities and manifest parsing
//! - `render`: Renderer port and normalization of rendered objects
//! - `kustomize`: Kustomize build renderer
//! - `materializer`: External secret materialization
//! - `reader`: Cluster state reader
//! - `diff`: Diff engine
//! - `state_machine`: Sync policy state machine
//! - `store`: Persisted application specs and Sync Run history
//! - `reconciler`: Per-application loops and ticks
//! - `control`: Control plane operations
//! - `server`: HTTP server for the control surface, metrics and health checks

pub mod control;
pub mod diff;
pub mod kustomize;
pub mod materializer;
pub mod reader;
pub mod reconciler;
pub mod render;
pub mod resource;
pub mod server;
pub mod state_machine;
pub mod store;
