//! # Kustomize Renderer
//!
//! Runs `kustomize build` over a pre-fetched source checkout.
//!
//! Layout expected under the checkout:
//!
//! ```text
//! <checkout>/<path>/overlays/<environment>/kustomization.yaml
//! ```
//!
//! The checkout of a repository is `SOURCES_DIR/<sanitized repo url>`, or the
//! repository value itself when it is an absolute local path. Fetching sources
//! is outside the reconciler.

use crate::controller::render::{RenderError, Renderer};
use crate::controller::resource::{parse_manifest_stream, ResourceObject};
use crate::observability::metrics;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, error, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    binary: String,
    sources_dir: PathBuf,
}

/// Map a repository URL to a single directory name
#[must_use]
pub fn sanitize_path_component(repo: &str) -> String {
    let trimmed = repo
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("ssh://")
        .trim_start_matches("git@")
        .trim_end_matches('/')
        .trim_end_matches(".git");
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl KustomizeRenderer {
    pub fn new(binary: impl Into<String>, sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            sources_dir: sources_dir.into(),
        }
    }

    #[must_use]
    pub fn checkout_dir(&self, repo: &str) -> PathBuf {
        let local = Path::new(repo);
        if local.is_absolute() {
            local.to_path_buf()
        } else {
            self.sources_dir.join(sanitize_path_component(repo))
        }
    }

    #[must_use]
    pub fn overlay_dir(&self, repo: &str, path: &str, overlay: &str) -> PathBuf {
        self.checkout_dir(repo)
            .join(path)
            .join("overlays")
            .join(overlay)
    }

    async fn build(&self, repo: &str, path: &str, overlay: &str) -> Result<Vec<ResourceObject>, RenderError> {
        let checkout = self.checkout_dir(repo);
        if !tokio::fs::try_exists(&checkout).await.unwrap_or(false) {
            return Err(RenderError::SourceNotFound(checkout));
        }
        let overlay_dir = self.overlay_dir(repo, path, overlay);
        if !tokio::fs::try_exists(overlay_dir.join("kustomization.yaml"))
            .await
            .unwrap_or(false)
        {
            return Err(RenderError::OverlayNotFound(overlay_dir));
        }

        debug!("Running kustomize build on path: {}", overlay_dir.display());
        let output = Command::new(&self.binary)
            .arg("build")
            .arg(&overlay_dir)
            .current_dir(&checkout)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RenderError::ToolFailed(format!("failed to execute {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::ToolFailed(stderr.trim().to_string()));
        }

        let yaml_output = String::from_utf8(output.stdout)
            .map_err(|e| RenderError::ToolFailed(format!("output is not UTF-8: {e}")))?;
        Ok(parse_manifest_stream(&yaml_output)?)
    }
}

#[async_trait]
impl Renderer for KustomizeRenderer {
    async fn render(
        &self,
        repo: &str,
        path: &str,
        overlay: &str,
    ) -> Result<Vec<ResourceObject>, RenderError> {
        let span = info_span!("kustomize.build", kustomize.path = path, overlay = overlay);
        let start = Instant::now();

        let result = self.build(repo, path, overlay).instrument(span).await;
        metrics::observe_render_duration(start.elapsed().as_secs_f64());

        match &result {
            Ok(objects) => debug!(count = objects.len(), "Kustomize build succeeded"),
            Err(e) => {
                error!("Kustomize build failed: {}", e);
                metrics::increment_render_errors();
            }
        }
        result
    }
}
