use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::{DeskError, Result};
use crate::git::Git;
use crate::process::CommandRunner;

/// Provisioning of isolated per-task checkouts.
/// Real implementation: `GitWorkspaceManager`. Tests use it over a `ScriptedRunner`.
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Ensure a worktree for `branch` exists at `path`, creating `branch` from
    /// `base` when it does not exist yet. Returns the workspace path.
    async fn create(&self, repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<PathBuf>;

    async fn remove(&self, repo_root: &Path, path: &Path) -> Result<()>;
}

/// Git worktrees under a single workspaces root.
pub struct GitWorkspaceManager {
    git: Git,
    root: PathBuf,
}

impl GitWorkspaceManager {
    pub fn new(runner: Arc<dyn CommandRunner>, root: impl Into<PathBuf>) -> Self {
        Self {
            git: Git::new(runner),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically check that `path` names a directory strictly below the root.
    pub fn ensure_inside_root(&self, path: &Path) -> Result<PathBuf> {
        let unsafe_path = || DeskError::UnsafeWorkspacePath {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };
        let root = normalize_lexical(&self.root).ok_or_else(unsafe_path)?;
        let candidate = normalize_lexical(path).ok_or_else(unsafe_path)?;
        if candidate == root || !candidate.starts_with(&root) {
            return Err(unsafe_path());
        }
        Ok(candidate)
    }
}

#[async_trait]
impl WorkspaceManager for GitWorkspaceManager {
    async fn create(&self, repo_root: &Path, path: &Path, branch: &str, base: &str) -> Result<PathBuf> {
        let path = self.ensure_inside_root(path)?;

        if path.join(".git").exists() {
            debug!(path = %path.display(), "reusing existing worktree");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeskError::io(parent, e))?;
        }

        let create_from = if self.git.branch_exists(repo_root, branch).await? {
            None
        } else {
            Some(base)
        };
        self.git
            .worktree_add(repo_root, &path, branch, create_from)
            .await?;
        info!(path = %path.display(), branch, new_branch = create_from.is_some(), "worktree ready");
        Ok(path)
    }

    async fn remove(&self, repo_root: &Path, path: &Path) -> Result<()> {
        let path = self.ensure_inside_root(path)?;
        if !path.exists() {
            debug!(path = %path.display(), "worktree already removed");
            return Ok(());
        }
        self.git.worktree_remove(repo_root, &path).await?;
        info!(path = %path.display(), "worktree removed");
        Ok(())
    }
}

/// Resolve `.` and `..` without touching the filesystem. `None` when `..`
/// climbs above the start of the path.
pub fn normalize_lexical(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
        }
    }
    Some(out)
}
