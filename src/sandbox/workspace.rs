//! Per-task workspace directories on the host.

use std::path::{Component, Path, PathBuf};

use crate::errors::SandboxError;
use crate::task::{CodeArtifactSet, TaskId};

/// A materialized workspace at `<root>/<task_id>`.
///
/// `cleanup` removes it; if the owner never gets that far (panic, dropped
/// future) the `Drop` impl removes it instead.
#[derive(Debug)]
pub struct TaskWorkspace {
    path: PathBuf,
    removed: bool,
}

impl TaskWorkspace {
    /// Create an empty workspace for `task_id` under `root`, replacing any
    /// leftover directory from an earlier run of the same task.
    pub async fn create(root: &Path, task_id: &TaskId) -> Result<Self, SandboxError> {
        let path = root.join(dir_name(task_id));
        let io_err = |source| SandboxError::Workspace {
            path: path.clone(),
            source,
        };

        if tokio::fs::try_exists(&path).await.map_err(io_err)? {
            tokio::fs::remove_dir_all(&path).await.map_err(io_err)?;
        }
        tokio::fs::create_dir_all(&path).await.map_err(io_err)?;
        // Bind mounts need an absolute path.
        let path = tokio::fs::canonicalize(&path).await.map_err(io_err)?;

        tracing::debug!(task_id = %task_id, path = %path.display(), "Created workspace");
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every artifact below the workspace. Returns the file count.
    pub async fn materialize(&self, artifacts: &CodeArtifactSet) -> Result<usize, SandboxError> {
        for (relative, contents) in &artifacts.files {
            let target = self.resolve(relative)?;
            let io_err = |source| SandboxError::Workspace {
                path: target.clone(),
                source,
            };
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            tokio::fs::write(&target, contents).await.map_err(io_err)?;
        }
        Ok(artifacts.len())
    }

    /// Remove the workspace. Failures are logged, never returned.
    pub async fn cleanup(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove workspace")
            }
        }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let candidate = Path::new(relative);
        let safe = !relative.is_empty()
            && candidate
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || candidate.components().all(|c| matches!(c, Component::CurDir)) {
            return Err(SandboxError::UnsafePath {
                path: relative.to_string(),
            });
        }
        Ok(self.path.join(candidate))
    }
}

impl Drop for TaskWorkspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed abandoned workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove abandoned workspace")
            }
        }
    }
}

/// Directory name for a task: the id with anything but `[A-Za-z0-9_-]`
/// replaced, so ids can't escape the root.
fn dir_name(task_id: &TaskId) -> String {
    let name: String = task_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() { "_".to_string() } else { name }
}
