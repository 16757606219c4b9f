//! # CRD Generator
//!
//! Prints the `Application` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/application.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use gitops_reconciler::crd::Application;
use kube::core::CustomResourceExt;

fn main() -> Result<()> {
    let crd = serde_yaml::to_string(&Application::crd()).context("Failed to serialize CRD")?;
    print!("{crd}");
    Ok(())
}
