//! Compile and finalize glue: buffer → renderer → validated artifact → output.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline::{CompileError, DocumentRenderer, FinalizeError, RenderRequest};

use crate::{DocumentBuffer, Gateway};

/// A rendered artifact that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    pub bytes: u64,
}

pub struct Compiler {
    gateway: Gateway,
    renderer: Arc<dyn DocumentRenderer>,
    min_artifact_bytes: u64,
}

impl Compiler {
    pub fn new(gateway: Gateway, renderer: Arc<dyn DocumentRenderer>, min_artifact_bytes: u64) -> Self {
        Self {
            gateway,
            renderer,
            min_artifact_bytes,
        }
    }

    pub fn artifact_extension(&self) -> &str {
        self.renderer.artifact_extension()
    }

    pub fn min_artifact_bytes(&self) -> u64 {
        self.min_artifact_bytes
    }

    /// Renders the buffer into `<workspace>/document.<ext>` and validates the
    /// result.
    pub async fn compile(
        &self,
        buffer: &DocumentBuffer,
        cover: Option<&Path>,
        workspace: &Path,
    ) -> Result<CompiledArtifact, CompileError> {
        let markdown = buffer.read_all().await.map_err(CompileError::Buffer)?;
        let destination = workspace.join(format!("document.{}", self.artifact_extension()));
        let request = RenderRequest {
            markdown: &markdown,
            cover,
            destination: &destination,
        };
        let path = self
            .gateway
            .call_local("render", self.renderer.render(&request))
            .await
            .map_err(CompileError::Renderer)?;

        let bytes = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(CompileError::Missing { path }),
        };
        if bytes < self.min_artifact_bytes {
            return Err(CompileError::Undersized {
                path,
                bytes,
                floor: self.min_artifact_bytes,
            });
        }
        tracing::info!(path = %path.display(), bytes, "Artifact compiled");
        Ok(CompiledArtifact { path, bytes })
    }
}

/// Moves `artifact` to `destination`, replacing any existing file, and checks
/// the delivered file against the byte floor. Returns the delivered size.
pub async fn finalize_artifact(
    artifact: &Path,
    destination: &Path,
    min_bytes: u64,
) -> Result<u64, FinalizeError> {
    let relocate_error = |source| FinalizeError::Relocate {
        from: artifact.to_path_buf(),
        to: destination.to_path_buf(),
        source,
    };

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(relocate_error)?;
    }
    if tokio::fs::rename(artifact, destination).await.is_err() {
        // Cross-device moves need a copy; copy also overwrites the destination.
        tokio::fs::copy(artifact, destination).await.map_err(relocate_error)?;
        if let Err(e) = tokio::fs::remove_file(artifact).await {
            tracing::warn!(path = %artifact.display(), error = %e, "Could not remove compiled artifact after copy");
        }
    }

    let bytes = match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            return Err(FinalizeError::Missing {
                path: destination.to_path_buf(),
            })
        }
    };
    if bytes < min_bytes {
        return Err(FinalizeError::Undersized {
            path: destination.to_path_buf(),
            bytes,
            floor: min_bytes,
        });
    }
    Ok(bytes)
}
