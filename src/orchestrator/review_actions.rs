use agentdesk_common::{AuditEntry, AuditKind, Task, TaskId};
use chrono::Utc;
use tracing::{info, warn};

use super::{Orchestrator, check_branch, parse_id};
use crate::errors::{DeskError, Result};
use crate::review::{DiffBrowser, ReviewDetail, ScopeAction, ensure_out, revert_targets};

impl Orchestrator {
    /// Fresh review detail for a task. `branch` defaults to the task branch.
    pub async fn load_review(&self, raw_id: &str, branch: Option<&str>) -> Result<ReviewDetail> {
        let id = parse_id(raw_id)?;
        let branch = branch.map(str::to_string).unwrap_or_else(|| id.branch_name());
        check_branch(&branch)?;
        let task = self.require_task(&id)?;
        self.review_loader.load(&task, &branch).await
    }

    pub fn diff_browser(&self, detail: &ReviewDetail) -> DiffBrowser {
        DiffBrowser::new(self.review_loader.clone(), detail, self.settings.page_size)
    }

    /// Record a reviewer note without changing the task.
    pub fn capture_feedback(&self, raw_id: &str, text: &str) -> Result<AuditEntry> {
        let id = parse_id(raw_id)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DeskError::MissingFeedback);
        }
        self.require_task(&id)?;
        self.audit(&id, AuditKind::Feedback, text, Vec::new())
    }

    /// Reject using a drafted feedback text.
    pub async fn submit_reject(&self, raw_id: &str, draft: &str) -> Result<Task> {
        self.reject_task(raw_id, draft).await
    }

    /// Accept the out-of-scope files as they are.
    pub fn accept_scope(&self, detail: &ReviewDetail, note: Option<&str>) -> Result<AuditEntry> {
        ensure_out(detail)?;
        let body = match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => note.to_string(),
            None => format!("accepted out-of-scope files: {}", detail.out_of_scope.join(", ")),
        };
        self.scope_audit(detail, ScopeAction::Accept, &body)
    }

    /// Record why the out-of-scope files belong in this change.
    pub fn explain_scope(&self, detail: &ReviewDetail, text: &str) -> Result<AuditEntry> {
        ensure_out(detail)?;
        let text = text.trim();
        if text.is_empty() {
            return Err(DeskError::InvalidInput("explanation is empty".to_string()));
        }
        self.scope_audit(detail, ScopeAction::Explain, text)
    }

    /// Restore files in the task workspace to their base-branch content and
    /// commit the result. Files the task added are deleted instead. With no
    /// files named, every out-of-scope file is reverted. Returns the reverted
    /// paths.
    ///
    /// If any step fails, the files already touched are restored from the
    /// task branch's HEAD so the workspace is left as it was.
    pub async fn revert_files(&self, detail: &ReviewDetail, files: &[String]) -> Result<Vec<String>> {
        ensure_out(detail)?;
        let targets = revert_targets(detail, files)?;
        let id = &detail.task.id;
        let workdir = self.workspace_path(id);
        let base = &self.settings.base_branch;

        let mut on_base = Vec::with_capacity(targets.len());
        for file in &targets {
            on_base.push(self.git.exists_at(&workdir, base, file).await?);
        }

        let mut touched: Vec<String> = Vec::new();
        let result = async {
            for (file, exists) in targets.iter().zip(&on_base) {
                touched.push(file.clone());
                if *exists {
                    self.git.checkout_file(&workdir, base, file).await?;
                    self.git.add(&workdir, file).await?;
                } else {
                    self.git.remove_file(&workdir, file).await?;
                }
            }
            let message = format!("Revert out-of-scope files for {}: {}", id, targets.join(", "));
            self.git.commit(&workdir, &message).await
        }
        .await;

        if let Err(e) = result {
            if let Err(restore) = self.git.restore_from_head(&workdir, &touched).await {
                warn!(task_id = %id, error = %restore, "could not restore workspace after failed revert");
            }
            return Err(e);
        }
        self.audit(id, ScopeAction::Revert.audit_kind(), &targets.join("\n"), targets.clone())?;
        info!(task_id = %id, files = ?targets, "out-of-scope files reverted");
        Ok(targets)
    }

    fn scope_audit(&self, detail: &ReviewDetail, action: ScopeAction, body: &str) -> Result<AuditEntry> {
        let entry = self.audit(
            &detail.task.id,
            action.audit_kind(),
            body,
            detail.out_of_scope.clone(),
        )?;
        info!(task_id = %detail.task.id, action = %entry.kind.as_str(), "scope action recorded");
        Ok(entry)
    }

    fn audit(&self, id: &TaskId, kind: AuditKind, body: &str, files: Vec<String>) -> Result<AuditEntry> {
        let entry = AuditEntry {
            task_id: id.clone(),
            kind,
            body: body.to_string(),
            files,
            created_at: Utc::now(),
        };
        self.store.append_audit(&entry)?;
        Ok(entry)
    }
}
