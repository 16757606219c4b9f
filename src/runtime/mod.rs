//! # Runtime
//!
//! Process startup and the `Application` custom resource watch.
//!
//! - `initialization`: wiring of ports, state restore and HTTP server startup
//! - `watch_loop`: mirrors `Application` resources into the registry

pub mod initialization;
pub mod watch_loop;
