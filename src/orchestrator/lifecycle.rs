use std::path::Path;

use agentdesk_common::{
    AuditEntry, AuditKind, NewTask, ReviewQueueEntry, Session, SessionState, Task, TaskId,
    TaskStatus, TestRun, TransitionError, transition,
};
use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::{Orchestrator, check_branch, parse_id};
use crate::errors::{DeskError, Result};
use crate::reservations::AcquireReport;
use crate::review::{Alignment, has_override_for, story_hash};
use crate::session::read_log_from;
use crate::shell;

impl Orchestrator {
    pub fn create_task(&self, new: NewTask) -> Result<Task> {
        if new.title.trim().is_empty() {
            return Err(DeskError::InvalidInput("task title is empty".to_string()));
        }
        let task = self
            .store
            .create_task(&self.settings.id_prefix, &new, Utc::now())?;
        info!(task_id = %task.id, title = %task.title, "task created");
        Ok(task)
    }

    /// `todo -> assigned`, recording who picked the task up.
    pub fn assign_task(&self, raw_id: &str, agent: &str) -> Result<Task> {
        let id = parse_id(raw_id)?;
        let agent = agent.trim();
        if agent.is_empty() {
            return Err(DeskError::InvalidInput("assignee is empty".to_string()));
        }
        let mut task = self.require_task(&id)?;
        task.status = transition(task.status, TaskStatus::Assigned).map_err(|source| {
            DeskError::IllegalTransition {
                id: id.to_string(),
                source,
            }
        })?;
        task.assignee = Some(agent.to_string());
        task.updated_at = Utc::now();
        self.store.update_task(&task)?;
        info!(task_id = %id, agent, "task assigned");
        Ok(task)
    }

    /// Provision the workspace and launch the worker session.
    ///
    /// A `todo` task passes through `assigned` on the way. Everything that can
    /// be refused (id, status, live session, log path) is checked before the
    /// first external command. A failure part way through leaves whatever was
    /// already created in place and the task status unchanged.
    pub async fn start_task(&self, raw_id: &str) -> Result<Session> {
        let id = parse_id(raw_id)?;
        let mut task = self.require_task(&id)?;

        let steps: &[TaskStatus] = match task.status {
            TaskStatus::Todo => &[TaskStatus::Assigned, TaskStatus::InProgress],
            _ => &[TaskStatus::InProgress],
        };
        let from = task.status;
        let mut status = from;
        for next in steps {
            status = transition(status, *next).map_err(|source| DeskError::IllegalTransition {
                id: id.to_string(),
                source,
            })?;
        }

        let existing = self.store.get_session(&id)?;
        if let Some(session) = &existing
            && session.state.is_live()
        {
            return Err(DeskError::SessionActive {
                task_id: id.to_string(),
                session_id: session.id.clone(),
            });
        }

        let session_id = id.session_id();
        let log_path = self.log_path(&id);
        shell::validate_log_path(&log_path)?;

        if let Some(session) = &existing
            && session.state == SessionState::Done
        {
            // The worker exited; make sure nothing is left attached.
            self.sessions.stop(&session.id).await?;
        }

        let workdir = self
            .workspaces
            .create(
                self.repo_root(),
                &self.workspace_path(&id),
                &id.branch_name(),
                &self.settings.base_branch,
            )
            .await?;
        self.sessions
            .start(&session_id, &workdir, &log_path, &self.settings.agent_cmd)
            .await?;

        let now = Utc::now();
        // Resuming keeps the hash from the first start so drift stays visible.
        if from != TaskStatus::Blocked || task.story_hash.is_none() {
            task.story_hash = Some(story_hash(&task.story));
        }
        task.status = status;
        task.updated_at = now;
        self.store.update_task(&task)?;

        let log_offset = existing
            .as_ref()
            .filter(|s| s.log_path == log_path)
            .map(|s| s.log_offset)
            .unwrap_or(0);
        let session = Session {
            id: session_id,
            task_id: id.clone(),
            state: SessionState::Working,
            log_offset,
            workdir: workdir.to_string_lossy().into_owned(),
            log_path,
            started_at: now,
            updated_at: now,
        };
        self.store.upsert_session(&session)?;
        info!(task_id = %id, session_id = %session.id, workdir = %session.workdir, "task started");
        Ok(session)
    }

    /// Stop the worker session and park the task as `blocked`.
    ///
    /// Stopping an already blocked task only makes sure the session is gone.
    pub async fn stop_task(&self, raw_id: &str) -> Result<Task> {
        let id = parse_id(raw_id)?;
        let mut task = self.require_task(&id)?;
        if !matches!(task.status, TaskStatus::InProgress | TaskStatus::Blocked) {
            return Err(DeskError::NotInProgress {
                id: id.to_string(),
                status: task.status,
            });
        }

        self.stop_session(&id).await?;

        if task.status == TaskStatus::InProgress {
            task.status = transition(task.status, TaskStatus::Blocked).map_err(|source| {
                DeskError::IllegalTransition {
                    id: id.to_string(),
                    source,
                }
            })?;
            task.updated_at = Utc::now();
            self.store.update_task(&task)?;
            info!(task_id = %id, "task stopped");
        }
        Ok(task)
    }

    /// Restart a `blocked` task in its existing workspace.
    pub async fn resume_task(&self, raw_id: &str) -> Result<Session> {
        let id = parse_id(raw_id)?;
        let task = self.require_task(&id)?;
        if task.status != TaskStatus::Blocked {
            return Err(DeskError::IllegalTransition {
                id: id.to_string(),
                source: TransitionError {
                    from: task.status,
                    to: TaskStatus::InProgress,
                },
            });
        }
        self.start_task(id.as_str()).await
    }

    /// `in_progress -> review`, placing the task's branch on the review queue.
    pub fn submit_for_review(&self, raw_id: &str) -> Result<ReviewQueueEntry> {
        let id = parse_id(raw_id)?;
        let mut task = self.require_task(&id)?;
        let from = task.status;
        task.status = transition(from, TaskStatus::Review).map_err(|_| DeskError::NotInProgress {
            id: id.to_string(),
            status: from,
        })?;
        let now = Utc::now();
        task.updated_at = now;
        self.store.update_task(&task)?;

        let entry = ReviewQueueEntry {
            task_id: id.clone(),
            branch: id.branch_name(),
            enqueued_at: now,
        };
        self.store.enqueue_review(&entry)?;
        info!(task_id = %id, branch = %entry.branch, "task submitted for review");
        Ok(entry)
    }

    /// Merge the task branch and mark the task `done`.
    ///
    /// Refused unless the task is in review. When the change reaches outside
    /// the declared scope, an accept or explain must have been recorded since
    /// the task entered the queue. A failed merge leaves the task in review.
    pub async fn approve_task(&self, raw_id: &str, branch: Option<&str>) -> Result<Task> {
        let id = parse_id(raw_id)?;
        let branch = branch.map(str::to_string).unwrap_or_else(|| id.branch_name());
        check_branch(&branch)?;

        let mut task = self.require_task(&id)?;
        if task.status != TaskStatus::Review {
            return Err(DeskError::NotInReview {
                id: id.to_string(),
                status: task.status,
            });
        }

        let detail = self.review_loader.load(&task, &branch).await?;
        if detail.alignment == Alignment::Out {
            let trail = self.store.audit_trail(&id)?;
            if !has_override_for(&trail, detail.enqueued_at, &detail.out_of_scope) {
                warn!(task_id = %id, out_of_scope = ?detail.out_of_scope, "approval blocked on scope");
                return Err(DeskError::AlignmentUnresolved { id: id.to_string() });
            }
        }

        self.approver.merge(&id, &branch).await?;

        task.status = transition(task.status, TaskStatus::Done).map_err(|source| {
            DeskError::IllegalTransition {
                id: id.to_string(),
                source,
            }
        })?;
        task.updated_at = Utc::now();
        self.store.update_task(&task)?;
        self.store.dequeue_review(&id)?;
        self.reservations.release_owner(id.as_str())?;
        info!(task_id = %id, branch = %branch, "task approved");
        Ok(task)
    }

    /// Send a reviewed task back to `todo` with the reviewer's feedback.
    pub async fn reject_task(&self, raw_id: &str, feedback: &str) -> Result<Task> {
        let id = parse_id(raw_id)?;
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(DeskError::MissingFeedback);
        }
        let mut task = self.require_task(&id)?;
        if task.status != TaskStatus::Review {
            return Err(DeskError::NotInReview {
                id: id.to_string(),
                status: task.status,
            });
        }

        self.stop_session(&id).await?;

        let now = Utc::now();
        task.status = transition(task.status, TaskStatus::Todo).map_err(|source| {
            DeskError::IllegalTransition {
                id: id.to_string(),
                source,
            }
        })?;
        task.feedback.push(feedback.to_string());
        task.updated_at = now;
        self.store.update_task(&task)?;
        self.store.append_audit(&AuditEntry {
            task_id: id.clone(),
            kind: AuditKind::Reject,
            body: feedback.to_string(),
            files: Vec::new(),
            created_at: now,
        })?;
        self.store.dequeue_review(&id)?;
        self.reservations.release_owner(id.as_str())?;
        info!(task_id = %id, "task rejected");
        Ok(task)
    }

    /// Mark a working session `done` once its tmux session has gone away.
    /// Returns the session as it now stands.
    pub async fn refresh(&self, raw_id: &str) -> Result<Option<Session>> {
        let id = parse_id(raw_id)?;
        self.refresh_session(&id).await
    }

    /// [`refresh`](Self::refresh) every task that is in progress.
    pub async fn refresh_all(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for task in self.store.list_tasks(Some(TaskStatus::InProgress))? {
            if let Some(session) = self.refresh_session(&task.id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    async fn refresh_session(&self, id: &TaskId) -> Result<Option<Session>> {
        let Some(mut session) = self.store.get_session(id)? else {
            return Ok(None);
        };
        if session.state == SessionState::Working && !self.sessions.is_alive(&session.id).await? {
            let now = Utc::now();
            self.store.set_session_state(id, SessionState::Done, now)?;
            session.state = SessionState::Done;
            session.updated_at = now;
            info!(task_id = %id, session_id = %session.id, "worker session finished");
        }
        Ok(Some(session))
    }

    /// Output the worker wrote since the last poll.
    pub async fn poll_output(&self, raw_id: &str) -> Result<String> {
        let id = parse_id(raw_id)?;
        let session = self
            .store
            .get_session(&id)?
            .ok_or_else(|| DeskError::SessionNotFound { id: id.session_id() })?;
        let (text, offset) = read_log_from(Path::new(&session.log_path), session.log_offset).await?;
        if offset != session.log_offset {
            self.store.set_log_offset(&id, offset, Utc::now())?;
        }
        debug!(task_id = %id, bytes = text.len(), offset, "polled worker output");
        Ok(text)
    }

    /// Reserve every file the task's workspace has touched, on behalf of the
    /// task. Paths held by someone else are reported, not fatal.
    pub async fn sync_reservations(&self, raw_id: &str, ttl: Option<Duration>) -> Result<AcquireReport> {
        let id = parse_id(raw_id)?;
        self.require_task(&id)?;
        let workdir = self.workspace_path(&id);
        if !workdir.exists() {
            return Ok(AcquireReport::default());
        }
        let files = self
            .git
            .changed_files(&workdir, &self.settings.base_branch)
            .await?;
        let reason = format!("working on {}", id);
        let report = self
            .reservations
            .acquire_many(&files, id.as_str(), &reason, ttl)?;
        info!(
            task_id = %id,
            granted = report.granted.len(),
            conflicts = report.conflicts.len(),
            "reservations synced"
        );
        Ok(report)
    }

    /// Tear down the workspace of a finished task.
    pub async fn cleanup_task(&self, raw_id: &str) -> Result<()> {
        let id = parse_id(raw_id)?;
        let task = self.require_task(&id)?;
        if task.status != TaskStatus::Done {
            return Err(DeskError::InvalidInput(format!(
                "task {} is {}, only done tasks can be cleaned up",
                id, task.status
            )));
        }
        self.stop_session(&id).await?;
        self.workspaces
            .remove(self.repo_root(), &self.workspace_path(&id))
            .await?;
        info!(task_id = %id, "workspace removed");
        Ok(())
    }

    pub fn record_test_run(&self, raw_id: &str, run: TestRun) -> Result<()> {
        let id = parse_id(raw_id)?;
        self.require_task(&id)?;
        self.store.record_test_run(&id, &run)?;
        debug!(task_id = %id, passed = run.passed, failed = run.failed, "test run recorded");
        Ok(())
    }

    /// Kill the task's tmux session if there is one and mark the stored
    /// session stopped. Safe to call repeatedly.
    async fn stop_session(&self, id: &TaskId) -> Result<()> {
        let existing = self.store.get_session(id)?;
        let session_id = existing
            .as_ref()
            .map(|s| s.id.clone())
            .unwrap_or_else(|| id.session_id());
        self.sessions.stop(&session_id).await?;
        if let Some(session) = existing
            && !session.state.is_stopped()
        {
            self.store
                .set_session_state(id, SessionState::Stopped, Utc::now())?;
        }
        Ok(())
    }
}
