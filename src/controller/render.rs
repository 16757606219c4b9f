//! # Renderer Port
//!
//! Produces the desired object set of an application from its source.
//! Rendered objects are normalized before anything else sees them: the
//! destination namespace is filled in, identities must be unique and every
//! object is stamped with the application's ownership label.

use crate::constants::LABEL_APPLICATION;
use crate::controller::resource::{ManifestError, ResourceId, ResourceObject};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("source checkout not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("overlay not found: {0}")]
    OverlayNotFound(PathBuf),
    #[error("render failed: {0}")]
    ToolFailed(String),
    #[error("render timed out after {0}s")]
    Timeout(u64),
    #[error("invalid manifest: {0}")]
    InvalidManifest(#[from] ManifestError),
    #[error("{id} targets namespace '{namespace}' but the destination is '{destination}'")]
    NamespaceMismatch {
        id: ResourceId,
        namespace: String,
        destination: String,
    },
    #[error("duplicate object identity {0}")]
    DuplicateIdentity(ResourceId),
    #[error("{0} is not a managed kind, add it to MANAGED_KINDS")]
    UnmanagedKind(ResourceId),
}

#[async_trait]
pub trait Renderer: Send + Sync + fmt::Debug {
    /// Render `path` of `repo` with the `overlay` environment applied
    async fn render(
        &self,
        repo: &str,
        path: &str,
        overlay: &str,
    ) -> Result<Vec<ResourceObject>, RenderError>;
}

/// Fill in the destination namespace, reject duplicates and foreign
/// namespaces, and stamp the ownership label
///
/// # Errors
///
/// Returns an error on a namespace outside the destination or on a duplicate identity.
pub fn normalize(
    objects: Vec<ResourceObject>,
    application: &str,
    destination_namespace: &str,
) -> Result<Vec<ResourceObject>, RenderError> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(objects.len());

    for mut object in objects {
        if object.namespace.is_empty() {
            object.namespace = destination_namespace.to_string();
        } else if object.namespace != destination_namespace {
            return Err(RenderError::NamespaceMismatch {
                id: object.id(),
                namespace: object.namespace,
                destination: destination_namespace.to_string(),
            });
        }

        let id = object.id();
        if !seen.insert(id.clone()) {
            return Err(RenderError::DuplicateIdentity(id));
        }

        object
            .labels
            .insert(LABEL_APPLICATION.to_string(), application.to_string());
        normalized.push(object);
    }

    Ok(normalized)
}

/// Fail on the first object whose kind the cluster reader does not list
///
/// Runs on the materialized set, after `ExternalSecret` objects became Secrets.
/// An object of an unlisted kind would be applied but never read back, so it
/// could neither converge nor be pruned.
///
/// # Errors
///
/// Returns [`RenderError::UnmanagedKind`] naming the offending object.
pub fn reject_unmanaged_kinds(
    objects: &[ResourceObject],
    managed_kinds: &BTreeSet<String>,
) -> Result<(), RenderError> {
    match objects
        .iter()
        .find(|object| !managed_kinds.contains(&object.kind))
    {
        Some(object) => Err(RenderError::UnmanagedKind(object.id())),
        None => Ok(()),
    }
}

/// Renderer serving fixed object sets, keyed by `(repo, path, overlay)`
#[derive(Debug, Default)]
pub struct StaticRenderer {
    outputs: RwLock<HashMap<(String, String, String), Result<Vec<ResourceObject>, String>>>,
    calls: AtomicUsize,
}

impl StaticRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, repo: &str, path: &str, overlay: &str, objects: Vec<ResourceObject>) {
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(repo, path, overlay), Ok(objects));
    }

    /// Make renders of the source fail with `message`
    pub fn fail(&self, repo: &str, path: &str, overlay: &str, message: &str) {
        self.outputs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key(repo, path, overlay), Err(message.to_string()));
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn key(repo: &str, path: &str, overlay: &str) -> (String, String, String) {
    (repo.to_string(), path.to_string(), overlay.to_string())
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(
        &self,
        repo: &str,
        path: &str,
        overlay: &str,
    ) -> Result<Vec<ResourceObject>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self
            .outputs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(repo, path, overlay))
        {
            Some(Ok(objects)) => Ok(objects.clone()),
            Some(Err(message)) => Err(RenderError::ToolFailed(message.clone())),
            None => Err(RenderError::SourceNotFound(PathBuf::from(repo).join(path))),
        }
    }
}
