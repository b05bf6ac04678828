//! Git worktree management for agent isolation.
//!
//! Each code-writing agent run gets its own worktree on a named branch so
//! parallel runs never touch the same checkout. Creation failure aborts
//! the run; removal failure is the caller's to log, not to raise.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};

#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_path: PathBuf,
}

impl WorktreeManager {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn worktree_path(&self, branch: &str) -> PathBuf {
        let dir_name: String = branch
            .chars()
            .map(|c| if c == '/' { '-' } else { c })
            .collect();
        self.repo_path.join(".maestro").join("worktrees").join(dir_name)
    }

    /// Create a worktree for `branch`. With `create_branch` the branch is
    /// made fresh; otherwise an existing branch is checked out. Returns
    /// the worktree path.
    pub async fn create(&self, branch: &str, create_branch: bool) -> DomainResult<PathBuf> {
        let path = self.worktree_path(branch);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DomainError::WorkspaceFailed(format!("creating worktree parent dir: {e}"))
            })?;
        }

        let mut cmd = Command::new("git");
        cmd.arg("worktree").arg("add");
        if create_branch {
            cmd.arg("-b").arg(branch).arg(&path);
        } else {
            cmd.arg(&path).arg(branch);
        }
        let output = cmd
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|e| DomainError::WorkspaceFailed(format!("running git worktree add: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::WorkspaceFailed(format!(
                "git worktree add failed for {branch}: {}",
                stderr.trim()
            )));
        }

        info!(branch, path = %path.display(), "worktree created");
        Ok(path)
    }

    /// Remove a worktree and prune its metadata.
    pub async fn remove(&self, path: &Path) -> DomainResult<()> {
        let output = Command::new("git")
            .arg("worktree")
            .arg("remove")
            .arg("--force")
            .arg(path)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|e| DomainError::WorkspaceFailed(format!("running git worktree remove: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DomainError::WorkspaceFailed(format!(
                "git worktree remove failed for {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        debug!(path = %path.display(), "worktree removed");
        Ok(())
    }
}
