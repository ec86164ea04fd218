//! Typed git operations over a [`CommandRunner`].
//!
//! Every call is `git -C <dir> ...` so no working directory state is needed,
//! and every argument is passed as its own argv entry.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{DeskError, Result};
use crate::process::CommandRunner;

/// Per-file line counts from `git diff --numstat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub path: String,
    pub added: u32,
    pub deleted: u32,
    /// Binary files report `-` for both counts.
    #[serde(default)]
    pub binary: bool,
}

#[derive(Clone)]
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-C".to_string());
        full.push(dir.to_string_lossy().into_owned());
        full.extend(args.iter().map(|a| a.to_string()));
        self.runner.run("git", &full).await
    }

    /// Whether `refs/heads/<branch>` exists. A failing rev-parse means "no";
    /// a git that cannot be spawned is still an error.
    pub async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{}", branch);
        match self
            .run(repo, &["rev-parse", "--verify", "--quiet", reference.as_str()])
            .await
        {
            Ok(_) => Ok(true),
            Err(DeskError::ToolFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Add a worktree at `path` for `branch`, creating the branch from `base`
    /// when `create_from` names a base.
    pub async fn worktree_add(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        create_from: Option<&str>,
    ) -> Result<()> {
        let path = path.to_string_lossy();
        match create_from {
            Some(base) => {
                self.run(repo, &["worktree", "add", "-b", branch, &*path, base])
                    .await?
            }
            None => self.run(repo, &["worktree", "add", &*path, branch]).await?,
        };
        Ok(())
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path) -> Result<()> {
        let path = path.to_string_lossy();
        self.run(repo, &["worktree", "remove", "--force", &*path])
            .await?;
        Ok(())
    }

    /// Line counts per file between `base` and `branch` (three-dot: changes
    /// on `branch` since it forked).
    pub async fn diff_numstat(&self, repo: &Path, base: &str, branch: &str) -> Result<Vec<FileStat>> {
        let range = format!("{}...{}", base, branch);
        let out = self.run(repo, &["diff", "--numstat", range.as_str()]).await?;
        Ok(parse_numstat(&out))
    }

    /// Unified diff of one file between `base` and `branch`.
    pub async fn diff_file(&self, repo: &Path, base: &str, branch: &str, file: &str) -> Result<String> {
        let range = format!("{}...{}", base, branch);
        self.run(repo, &["diff", range.as_str(), "--", file]).await
    }

    /// Files a worktree has changed relative to `base`, committed or not,
    /// plus untracked files.
    pub async fn changed_files(&self, workdir: &Path, base: &str) -> Result<Vec<String>> {
        let tracked = self.run(workdir, &["diff", "--name-only", base]).await?;
        let untracked = self
            .run(workdir, &["ls-files", "--others", "--exclude-standard"])
            .await?;
        let mut files: Vec<String> = Vec::new();
        for line in tracked.lines().chain(untracked.lines()) {
            let line = line.trim();
            if !line.is_empty() && !files.iter().any(|f| f == line) {
                files.push(line.to_string());
            }
        }
        Ok(files)
    }

    /// Restore `file` in `workdir` to its content on `base`.
    pub async fn checkout_file(&self, workdir: &Path, base: &str, file: &str) -> Result<()> {
        self.run(workdir, &["checkout", base, "--", file]).await?;
        Ok(())
    }

    /// Whether `file` exists in the tree of `rev`. A failing lookup means
    /// "no"; a git that cannot be spawned is still an error.
    pub async fn exists_at(&self, workdir: &Path, rev: &str, file: &str) -> Result<bool> {
        let object = format!("{}:{}", rev, file);
        match self.run(workdir, &["cat-file", "-e", object.as_str()]).await {
            Ok(_) => Ok(true),
            Err(DeskError::ToolFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete `file` from the index and the worktree.
    pub async fn remove_file(&self, workdir: &Path, file: &str) -> Result<()> {
        self.run(workdir, &["rm", "-f", "--quiet", "--", file]).await?;
        Ok(())
    }

    /// Put `files` back to their committed content, in the index and the
    /// worktree.
    pub async fn restore_from_head(&self, workdir: &Path, files: &[String]) -> Result<()> {
        let mut args = vec!["checkout", "HEAD", "--"];
        args.extend(files.iter().map(String::as_str));
        self.run(workdir, &args).await?;
        Ok(())
    }

    pub async fn add(&self, workdir: &Path, file: &str) -> Result<()> {
        self.run(workdir, &["add", "--", file]).await?;
        Ok(())
    }

    pub async fn commit(&self, workdir: &Path, message: &str) -> Result<()> {
        self.run(workdir, &["commit", "-m", message]).await?;
        Ok(())
    }

    pub async fn checkout(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run(repo, &["checkout", branch]).await?;
        Ok(())
    }

    /// Non-fast-forward merge of `branch` into whatever `repo` has checked out.
    pub async fn merge(&self, repo: &Path, branch: &str, message: &str) -> Result<()> {
        self.run(repo, &["merge", "--no-ff", "-m", message, branch])
            .await?;
        Ok(())
    }
}

/// Parse `git diff --numstat` output. Lines that do not have three
/// tab-separated fields are skipped.
pub fn parse_numstat(output: &str) -> Vec<FileStat> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let added = parts.next()?;
            let deleted = parts.next()?;
            let path = parts.next()?.trim();
            if path.is_empty() {
                return None;
            }
            if added == "-" && deleted == "-" {
                return Some(FileStat {
                    path: path.to_string(),
                    added: 0,
                    deleted: 0,
                    binary: true,
                });
            }
            Some(FileStat {
                path: path.to_string(),
                added: added.parse().ok()?,
                deleted: deleted.parse().ok()?,
                binary: false,
            })
        })
        .collect()
}
