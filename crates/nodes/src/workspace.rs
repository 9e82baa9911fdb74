//! Per-run scratch directory.
//!
//! ```text
//! <work_root>/<slug>-<run_id>/
//!     outline.md      raw outline as returned by the outline collaborator
//!     document.md     the document buffer
//!     cover.<ext>     cover image, when one was resolved
//!     document.<ext>  compiled artifact before it is moved to the output dir
//!     run.json        RunState, rewritten after every transition
//! ```

use std::path::{Path, PathBuf};

use pipeline::{RunId, RunState, TopicSlug};

const OUTLINE_FILE: &str = "outline.md";
const BUFFER_FILE: &str = "document.md";
const STATE_FILE: &str = "run.json";

#[derive(Debug, Clone)]
pub struct RunWorkspace {
    dir: PathBuf,
}

impl RunWorkspace {
    /// Names the workspace of `run_id`; nothing is created until [`prepare`](Self::prepare).
    pub fn new(work_root: &Path, slug: &TopicSlug, run_id: RunId) -> Self {
        Self {
            dir: work_root.join(format!("{slug}-{run_id}")),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn buffer_path(&self) -> PathBuf {
        self.dir.join(BUFFER_FILE)
    }

    pub fn outline_path(&self) -> PathBuf {
        self.dir.join(OUTLINE_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Creates an empty workspace directory, wiping any leftover one.
    pub async fn prepare(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub async fn save_outline(&self, outline: &str) -> std::io::Result<()> {
        tokio::fs::write(self.outline_path(), outline).await
    }

    /// Writes `run.json`. Failures are logged and swallowed; the audit trail
    /// never changes a run's outcome.
    pub async fn persist(&self, state: &RunState) {
        let json = match serde_json::to_vec_pretty(state) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise run state");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(self.state_path(), json).await {
            tracing::warn!(path = %self.state_path().display(), error = %e, "Failed to persist run state");
        }
    }
}
