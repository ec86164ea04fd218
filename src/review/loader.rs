use std::path::PathBuf;
use std::sync::Arc;

use agentdesk_common::Task;
use async_trait::async_trait;
use tracing::debug;

use super::{ReviewDetail, classify_alignment, story_drift};
use crate::errors::Result;
use crate::git::Git;
use crate::process::CommandRunner;
use crate::store::Store;

/// Source of review data for a task branch.
/// Real implementation: `GitReviewLoader`.
#[async_trait]
pub trait ReviewLoader: Send + Sync {
    /// Build a fresh detail for `task` on `branch`. Nothing is cached.
    async fn load(&self, task: &Task, branch: &str) -> Result<ReviewDetail>;

    /// Unified diff of one file on `branch` against the base branch.
    async fn file_diff(&self, task: &Task, branch: &str, file: &str) -> Result<String>;
}

pub struct GitReviewLoader {
    git: Git,
    store: Arc<dyn Store>,
    repo_root: PathBuf,
    base_branch: String,
}

impl GitReviewLoader {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        store: Arc<dyn Store>,
        repo_root: impl Into<PathBuf>,
        base_branch: impl Into<String>,
    ) -> Self {
        Self {
            git: Git::new(runner),
            store,
            repo_root: repo_root.into(),
            base_branch: base_branch.into(),
        }
    }
}

#[async_trait]
impl ReviewLoader for GitReviewLoader {
    async fn load(&self, task: &Task, branch: &str) -> Result<ReviewDetail> {
        let files = self
            .git
            .diff_numstat(&self.repo_root, &self.base_branch, branch)
            .await?;
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let (alignment, out_of_scope) = classify_alignment(&task.scope, &paths);
        let tests = self.store.latest_test_run(&task.id)?;
        let enqueued_at = self.store.review_entry(&task.id)?.map(|e| e.enqueued_at);

        debug!(
            task_id = %task.id,
            files = files.len(),
            alignment = %alignment,
            "review detail loaded"
        );
        Ok(ReviewDetail {
            task: task.clone(),
            branch: branch.to_string(),
            base_branch: self.base_branch.clone(),
            files,
            tests,
            criteria: task.acceptance_criteria.clone(),
            story_drift: story_drift(task),
            alignment,
            out_of_scope,
            enqueued_at,
        })
    }

    async fn file_diff(&self, _task: &Task, branch: &str, file: &str) -> Result<String> {
        self.git
            .diff_file(&self.repo_root, &self.base_branch, branch, file)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedRunner;
    use crate::review::Alignment;
    use crate::store::SqliteStore;
    use agentdesk_common::{NewTask, TestRun};
    use chrono::Utc;

    #[tokio::test]
    async fn load_aggregates_diff_tests_and_alignment() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let task = store
            .create_task(
                "T",
                &NewTask {
                    title: "login".into(),
                    acceptance_criteria: vec!["user can log in".into()],
                    scope: vec!["src/auth/**".into()],
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();
        store
            .record_test_run(
                &task.id,
                &TestRun {
                    passed: 4,
                    failed: 1,
                    skipped: 0,
                    summary: "1 flaky".into(),
                    recorded_at: Utc::now(),
                },
            )
            .unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        runner.reply(
            "git",
            &["diff", "--numstat"],
            "10\t2\tsrc/auth/login.rs\n3\t0\tREADME.md\n",
        );
        let loader = GitReviewLoader::new(runner.clone(), store, "/repo", "main");

        let detail = loader.load(&task, "feature/T-001").await.unwrap();
        assert_eq!(detail.files.len(), 2);
        assert_eq!(detail.total_added(), 13);
        assert_eq!(detail.alignment, Alignment::Out);
        assert_eq!(detail.out_of_scope, vec!["README.md"]);
        assert_eq!(detail.criteria, vec!["user can log in"]);
        assert_eq!(detail.tests.map(|t| t.failed), Some(1));
        assert!(!detail.story_drift);
        assert!(detail.enqueued_at.is_none());

        let call = &runner.calls()[0];
        assert!(call.has_arg("main...feature/T-001"));
    }
}
