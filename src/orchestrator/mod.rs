//! Task lifecycle orchestration.
//!
//! The [`Orchestrator`] turns operator intents (start, stop, approve, ...)
//! into validated state transitions plus the workspace, session and version
//! control side effects they imply. Each collaborator sits behind a trait so
//! tests can swap in fakes with the `with_*` builders.

mod approver;
mod lifecycle;
mod review_actions;

pub use approver::{Approver, GitApprover};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentdesk_common::{Session, Task, TaskId, TaskStatus};
use anyhow::Context;
use chrono::Duration;

use crate::config::DeskConfig;
use crate::errors::{DeskError, Result};
use crate::git::Git;
use crate::mailbox::Mailbox;
use crate::process::{CommandRunner, SystemRunner};
use crate::reservations::ReservationManager;
use crate::review::{GitReviewLoader, ReviewLoader};
use crate::session::{SessionManager, TmuxSessionManager};
use crate::store::{SqliteStore, Store};
use crate::workspace::{GitWorkspaceManager, WorkspaceManager};

/// Paths and knobs the orchestrator needs, resolved from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub repo_root: PathBuf,
    pub workspaces_root: PathBuf,
    pub log_dir: PathBuf,
    pub base_branch: String,
    pub agent_cmd: String,
    pub id_prefix: String,
    pub default_ttl: Duration,
    pub page_size: usize,
}

impl OrchestratorSettings {
    /// Defaults for a repository at `repo_root`.
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        Self {
            workspaces_root: repo_root.join(".agentdesk/worktrees"),
            log_dir: repo_root.join(".agentdesk/logs"),
            repo_root,
            base_branch: "main".to_string(),
            agent_cmd: "claude".to_string(),
            id_prefix: "TASK".to_string(),
            default_ttl: Duration::seconds(3600),
            page_size: 40,
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        Self {
            repo_root: config.project_dir.clone(),
            workspaces_root: config.workspaces_root(),
            log_dir: config.log_dir(),
            base_branch: config.base_branch(),
            agent_cmd: config.agent_cmd(),
            id_prefix: config.id_prefix().to_string(),
            default_ttl: config.default_ttl(),
            page_size: config.page_size(),
        }
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    store: Arc<dyn Store>,
    git: Git,
    workspaces: Arc<dyn WorkspaceManager>,
    sessions: Arc<dyn SessionManager>,
    approver: Arc<dyn Approver>,
    review_loader: Arc<dyn ReviewLoader>,
    reservations: ReservationManager,
    mailbox: Mailbox,
}

impl Orchestrator {
    /// Wire the production collaborators over `runner` and `store`.
    pub fn new(settings: OrchestratorSettings, store: Arc<dyn Store>, runner: Arc<dyn CommandRunner>) -> Self {
        let workspaces = Arc::new(GitWorkspaceManager::new(
            runner.clone(),
            settings.workspaces_root.clone(),
        ));
        let sessions = Arc::new(TmuxSessionManager::new(runner.clone()));
        let approver = Arc::new(GitApprover::new(
            runner.clone(),
            settings.repo_root.clone(),
            settings.base_branch.clone(),
        ));
        let review_loader = Arc::new(GitReviewLoader::new(
            runner.clone(),
            store.clone(),
            settings.repo_root.clone(),
            settings.base_branch.clone(),
        ));
        Self {
            reservations: ReservationManager::new(store.clone(), settings.default_ttl),
            mailbox: Mailbox::new(store.clone()),
            git: Git::new(runner),
            settings,
            store,
            workspaces,
            sessions,
            approver,
            review_loader,
        }
    }

    /// Open the project's database and drive real `git` and `tmux`.
    pub fn open(config: &DeskConfig) -> anyhow::Result<Self> {
        let store = SqliteStore::open(&config.db_path())
            .with_context(|| format!("Failed to open database {}", config.db_path().display()))?;
        Ok(Self::new(
            OrchestratorSettings::from_config(config),
            Arc::new(store),
            Arc::new(SystemRunner::new()),
        ))
    }

    pub fn with_workspaces(mut self, workspaces: Arc<dyn WorkspaceManager>) -> Self {
        self.workspaces = workspaces;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionManager>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = approver;
        self
    }

    pub fn with_review_loader(mut self, loader: Arc<dyn ReviewLoader>) -> Self {
        self.review_loader = loader;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn get_task(&self, raw_id: &str) -> Result<Task> {
        let id = parse_id(raw_id)?;
        self.require_task(&id)
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.store.list_tasks(status)
    }

    pub fn session(&self, raw_id: &str) -> Result<Option<Session>> {
        let id = parse_id(raw_id)?;
        self.store.get_session(&id)
    }

    fn require_task(&self, id: &TaskId) -> Result<Task> {
        self.store
            .get_task(id)?
            .ok_or_else(|| DeskError::TaskNotFound { id: id.to_string() })
    }

    fn workspace_path(&self, id: &TaskId) -> PathBuf {
        self.settings.workspaces_root.join(id.as_str())
    }

    fn log_path(&self, id: &TaskId) -> String {
        self.settings
            .log_dir
            .join(format!("{}.log", id))
            .to_string_lossy()
            .into_owned()
    }

    fn repo_root(&self) -> &Path {
        &self.settings.repo_root
    }
}

/// Validate a caller-supplied task id.
pub fn parse_id(raw: &str) -> Result<TaskId> {
    TaskId::parse(raw).map_err(|reason| DeskError::invalid_task_id(raw, reason))
}

/// Validate a caller-supplied branch name before it reaches git.
fn check_branch(branch: &str) -> Result<()> {
    if branch.is_empty()
        || branch.starts_with('-')
        || branch.contains("..")
        || branch.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DeskError::InvalidInput(format!("invalid branch name '{}'", branch)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_hostile_input() {
        for raw in ["../etc", "a/b", "T1\\x", "", &"T".repeat(70)] {
            let err = parse_id(raw).unwrap_err();
            assert!(matches!(err, DeskError::InvalidTaskId { .. }), "{raw}");
        }
        assert_eq!(parse_id("TASK-001").unwrap().as_str(), "TASK-001");
    }

    #[test]
    fn check_branch_refuses_option_like_names() {
        assert!(check_branch("feature/T1").is_ok());
        assert!(check_branch("--upload-pack=x").is_err());
        assert!(check_branch("a b").is_err());
        assert!(check_branch("a..b").is_err());
    }

    #[test]
    fn settings_default_under_repo() {
        let s = OrchestratorSettings::new("/repo");
        assert_eq!(s.workspaces_root, PathBuf::from("/repo/.agentdesk/worktrees"));
        assert_eq!(s.log_dir, PathBuf::from("/repo/.agentdesk/logs"));
    }
}
