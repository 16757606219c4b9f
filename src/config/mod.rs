//! # Configuration
//!
//! Process-level settings for the reconciler, loaded from environment variables.

mod controller;

pub use controller::ControllerConfig;
