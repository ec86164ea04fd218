use std::path::PathBuf;
use std::sync::Arc;

use agentdesk_common::TaskId;
use async_trait::async_trait;
use tracing::info;

use crate::errors::Result;
use crate::git::Git;
use crate::process::CommandRunner;

/// Abstraction over integrating an approved branch for testability.
/// Real implementation: `GitApprover`.
#[async_trait]
pub trait Approver: Send + Sync {
    /// Merge `branch` for `task_id` into the base branch. A failure leaves the
    /// task where it was.
    async fn merge(&self, task_id: &TaskId, branch: &str) -> Result<()>;
}

pub struct GitApprover {
    git: Git,
    repo_root: PathBuf,
    base_branch: String,
}

impl GitApprover {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_root: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            git: Git::new(runner),
            repo_root: repo_root.into(),
            base_branch: base_branch.into(),
        }
    }
}

#[async_trait]
impl Approver for GitApprover {
    async fn merge(&self, task_id: &TaskId, branch: &str) -> Result<()> {
        self.git.checkout(&self.repo_root, &self.base_branch).await?;
        let message = format!("Merge {} ({})", branch, task_id);
        self.git.merge(&self.repo_root, branch, &message).await?;
        info!(task_id = %task_id, branch, base = %self.base_branch, "branch merged");
        Ok(())
    }
}
