//! Lifecycle flows driven through the public `Orchestrator` API.
//!
//! Every external command goes to a `ScriptedRunner`, so these tests check
//! both the resulting state and exactly which git/tmux commands ran.

use std::sync::Arc;

use agentdesk::common::{AuditKind, NewTask, SessionState, TaskStatus};
use agentdesk::errors::{DeskError, ErrorKind};
use agentdesk::process::ScriptedRunner;
use agentdesk::review::{Alignment, ReviewDetail};
use agentdesk::store::{SqliteStore, Store};
use agentdesk::{Orchestrator, OrchestratorSettings};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    runner: Arc<ScriptedRunner>,
    store: Arc<SqliteStore>,
    orch: Orchestrator,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let settings = OrchestratorSettings::new(dir.path());
    let runner = Arc::new(ScriptedRunner::new());
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let orch = Orchestrator::new(settings, store.clone(), runner.clone());
    Harness {
        dir,
        runner,
        store,
        orch,
    }
}

fn add_task(h: &Harness, title: &str, scope: &[&str]) -> String {
    h.orch
        .create_task(NewTask {
            title: title.to_string(),
            story: format!("As a user I want {}", title),
            scope: scope.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
        .id
        .to_string()
}

async fn in_review(h: &Harness, scope: &[&str]) -> String {
    let id = add_task(h, "login", scope);
    h.orch.start_task(&id).await.unwrap();
    h.orch.submit_for_review(&id).unwrap();
    id
}

fn merges(h: &Harness) -> usize {
    h.runner.calls_with("git", "merge").len()
}

#[tokio::test]
async fn start_provisions_worktree_and_session() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    assert_eq!(id, "TASK-001");

    let session = h.orch.start_task(&id).await.unwrap();
    assert_eq!(session.id, "ad-TASK-001");
    assert_eq!(session.state, SessionState::Working);
    assert!(session.workdir.ends_with(".agentdesk/worktrees/TASK-001"));

    let task = h.orch.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert!(task.story_hash.is_some());

    let worktree = h.runner.calls_with("git", "worktree");
    assert_eq!(worktree.len(), 1);
    assert!(worktree[0].has_arg("feature/TASK-001"));
    let new_session = h.runner.calls_with("tmux", "new-session");
    assert_eq!(new_session.len(), 1);
    assert!(new_session[0].has_arg("ad-TASK-001"));
    assert_eq!(h.runner.calls_with("tmux", "send-keys").len(), 1);
}

#[tokio::test]
async fn start_then_stop_leaves_task_blocked_with_no_live_session() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    h.orch.start_task(&id).await.unwrap();

    let task = h.orch.stop_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    let session = h.orch.session(&id).unwrap().unwrap();
    assert!(session.state.is_stopped());
    assert_eq!(h.runner.calls_with("tmux", "kill-session").len(), 1);

    // Stopping again is harmless.
    let again = h.orch.stop_task(&id).await.unwrap();
    assert_eq!(again.status, TaskStatus::Blocked);
}

#[tokio::test]
async fn resume_restarts_a_blocked_task() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let first = h.orch.start_task(&id).await.unwrap();
    let hash = h.orch.get_task(&id).unwrap().story_hash;
    h.orch.stop_task(&id).await.unwrap();

    let resumed = h.orch.resume_task(&id).await.unwrap();
    assert_eq!(resumed.id, first.id);
    assert_eq!(resumed.state, SessionState::Working);
    let task = h.orch.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.story_hash, hash);
    assert_eq!(h.runner.calls_with("tmux", "new-session").len(), 2);
}

#[tokio::test]
async fn resume_of_a_todo_task_is_an_illegal_transition() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let err = h.orch.resume_task(&id).await.unwrap_err();
    assert!(matches!(err, DeskError::IllegalTransition { .. }));
    assert_eq!(h.runner.call_count(), 0);
}

#[tokio::test]
async fn live_session_blocks_a_second_start() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    h.orch.start_task(&id).await.unwrap();
    h.orch.stop_task(&id).await.unwrap();
    let task_id = h.orch.get_task(&id).unwrap().id;
    h.store
        .set_session_state(&task_id, SessionState::Working, chrono::Utc::now())
        .unwrap();
    let before = h.runner.call_count();

    let err = h.orch.resume_task(&id).await.unwrap_err();
    assert!(matches!(err, DeskError::SessionActive { .. }));
    assert_eq!(h.runner.call_count(), before);
}

#[tokio::test]
async fn invalid_ids_fail_before_any_side_effect() {
    let h = harness();
    let long = "T".repeat(65) + "1";
    for raw in ["../etc", "a/b", "T1\\evil", "..", long.as_str()] {
        let results = [
            h.orch.start_task(raw).await.err(),
            h.orch.stop_task(raw).await.err(),
            h.orch.resume_task(raw).await.err(),
            h.orch.approve_task(raw, None).await.err(),
            h.orch.reject_task(raw, "Needs work").await.err(),
            h.orch.cleanup_task(raw).await.err(),
            h.orch.poll_output(raw).await.err(),
            h.orch.refresh(raw).await.err(),
            h.orch.submit_for_review(raw).err(),
        ];
        for err in results {
            let err = err.expect("hostile id must be refused");
            assert!(matches!(err, DeskError::InvalidTaskId { .. }), "{raw}: {err}");
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }
    assert_eq!(h.runner.call_count(), 0);
    assert!(!h.dir.path().join(".agentdesk").exists());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = harness();
    let err = h.orch.start_task("TASK-404").await.unwrap_err();
    assert!(matches!(err, DeskError::TaskNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn reject_requires_feedback_and_returns_task_to_todo() {
    let h = harness();
    let id = in_review(&h, &[]).await;

    let err = h.orch.reject_task(&id, "   ").await.unwrap_err();
    assert!(matches!(err, DeskError::MissingFeedback));
    assert_eq!(h.orch.get_task(&id).unwrap().status, TaskStatus::Review);

    let task = h.orch.reject_task(&id, "Needs work").await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.feedback, vec!["Needs work"]);
    assert!(h.store.review_entry(&task.id).unwrap().is_none());

    let trail = h.store.audit_trail(&task.id).unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].kind, AuditKind::Reject);
    assert_eq!(trail[0].body, "Needs work");
}

#[tokio::test]
async fn submit_is_only_legal_from_in_progress() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let err = h.orch.submit_for_review(&id).unwrap_err();
    assert!(matches!(err, DeskError::NotInProgress { status: TaskStatus::Todo, .. }));

    h.orch.start_task(&id).await.unwrap();
    h.orch.submit_for_review(&id).unwrap();
    let err = h.orch.submit_for_review(&id).unwrap_err();
    assert!(matches!(err, DeskError::NotInProgress { status: TaskStatus::Review, .. }));
    assert_eq!(h.store.review_queue().unwrap().len(), 1);
}

#[tokio::test]
async fn reject_outside_review_is_refused() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let err = h.orch.reject_task(&id, "Needs work").await.unwrap_err();
    assert!(matches!(err, DeskError::NotInReview { .. }));
}

#[tokio::test]
async fn approve_merges_and_dequeues_exactly_once() {
    let h = harness();
    let id = in_review(&h, &[]).await;
    let task_id = h.orch.get_task(&id).unwrap().id;
    h.orch
        .reservations()
        .acquire("src/lib.rs", &id, "working", None)
        .unwrap();

    let task = h.orch.approve_task(&id, None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(merges(&h), 1);
    assert!(h.store.review_entry(&task_id).unwrap().is_none());
    assert!(h.orch.reservations().check("src/lib.rs").unwrap().is_none());

    let err = h.orch.approve_task(&id, None).await.unwrap_err();
    assert!(matches!(err, DeskError::NotInReview { .. }));
    assert_eq!(merges(&h), 1);
}

#[tokio::test]
async fn approve_outside_review_never_merges() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    h.orch.start_task(&id).await.unwrap();
    let err = h.orch.approve_task(&id, None).await.unwrap_err();
    assert!(matches!(err, DeskError::NotInReview { .. }));
    assert_eq!(merges(&h), 0);
}

#[tokio::test]
async fn failed_merge_leaves_task_in_review() {
    let h = harness();
    let id = in_review(&h, &[]).await;
    h.runner.fail("git", &["merge"], "CONFLICT (content): Merge conflict in src/lib.rs");

    let err = h.orch.approve_task(&id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert!(err.to_string().contains("Merge conflict in src/lib.rs"));
    let task = h.orch.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Review);
    assert!(h.store.review_entry(&task.id).unwrap().is_some());
}

#[tokio::test]
async fn out_of_scope_change_blocks_approve_until_accepted() {
    let h = harness();
    let id = in_review(&h, &["src/auth/**"]).await;
    h.runner.reply(
        "git",
        &["diff", "--numstat"],
        "10\t2\tsrc/auth/login.rs\n3\t0\tREADME.md\n",
    );

    let err = h.orch.approve_task(&id, None).await.unwrap_err();
    assert!(matches!(err, DeskError::AlignmentUnresolved { .. }));
    assert_eq!(merges(&h), 0);

    let detail = h.orch.load_review(&id, None).await.unwrap();
    assert_eq!(detail.alignment, Alignment::Out);
    assert_eq!(detail.out_of_scope, vec!["README.md"]);
    assert!(detail.enqueued_at.is_some());
    let entry = h.orch.accept_scope(&detail, None).unwrap();
    assert_eq!(entry.kind, AuditKind::Accept);
    assert!(entry.body.contains("README.md"));

    let task = h.orch.approve_task(&id, None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(merges(&h), 1);
}

#[tokio::test]
async fn explain_also_unblocks_approve() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    h.runner
        .reply("git", &["diff", "--numstat"], "1\t1\tCargo.toml\n");

    let detail = h.orch.load_review(&id, None).await.unwrap();
    let err = h.orch.explain_scope(&detail, "  ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    h.orch
        .explain_scope(&detail, "new dependency for the login form")
        .unwrap();

    h.orch.approve_task(&id, None).await.unwrap();
    assert_eq!(merges(&h), 1);
}

#[tokio::test]
async fn scope_actions_require_out_alignment() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    h.runner
        .reply("git", &["diff", "--numstat"], "1\t1\tsrc/lib.rs\n");

    let detail = h.orch.load_review(&id, None).await.unwrap();
    assert_eq!(detail.alignment, Alignment::Mvp);
    let err = h.orch.accept_scope(&detail, None).unwrap_err();
    assert!(matches!(err, DeskError::AlignmentNotOut { .. }));
    let err = h.orch.revert_files(&detail, &[]).await.unwrap_err();
    assert!(matches!(err, DeskError::AlignmentNotOut { .. }));
}

#[tokio::test]
async fn revert_with_zero_files_runs_no_git_command() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    let task = h.orch.get_task(&id).unwrap();
    let detail = ReviewDetail {
        task,
        branch: "feature/TASK-001".into(),
        base_branch: "main".into(),
        files: Vec::new(),
        tests: None,
        criteria: Vec::new(),
        story_drift: false,
        alignment: Alignment::Out,
        out_of_scope: Vec::new(),
        enqueued_at: None,
    };
    let before = h.runner.call_count();

    let err = h.orch.revert_files(&detail, &[]).await.unwrap_err();
    assert!(matches!(err, DeskError::NothingToRevert));
    assert_eq!(err.to_string(), "no files to revert");
    assert_eq!(h.runner.call_count(), before);
}

#[tokio::test]
async fn revert_restores_out_of_scope_files_and_commits() {
    let h = harness();
    let id = in_review(&h, &["src/auth/**"]).await;
    h.runner.reply(
        "git",
        &["diff", "--numstat"],
        "10\t2\tsrc/auth/login.rs\n3\t0\tREADME.md\n",
    );
    let detail = h.orch.load_review(&id, None).await.unwrap();

    let reverted = h.orch.revert_files(&detail, &[]).await.unwrap();
    assert_eq!(reverted, vec!["README.md"]);

    let checkout = h.runner.calls_with("git", "README.md");
    assert_eq!(checkout.len(), 2);
    assert!(checkout[0].has_arg("checkout") && checkout[0].has_arg("main"));
    assert!(checkout[1].has_arg("add"));
    let commits = h.runner.calls_with("git", "commit");
    assert_eq!(commits.len(), 1);
    assert!(commits[0].command_line().contains(".agentdesk/worktrees/TASK-001"));

    let trail = h.store.audit_trail(&detail.task.id).unwrap();
    assert_eq!(trail.last().map(|e| e.kind), Some(AuditKind::Revert));
}

#[tokio::test]
async fn revert_deletes_files_the_task_added() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    h.runner
        .reply("git", &["diff", "--numstat"], "1\t0\tnotes.txt\n")
        .fail(
            "git",
            &["cat-file", "main:notes.txt"],
            "fatal: path 'notes.txt' does not exist in 'main'",
        );
    let detail = h.orch.load_review(&id, None).await.unwrap();

    let reverted = h.orch.revert_files(&detail, &[]).await.unwrap();
    assert_eq!(reverted, vec!["notes.txt"]);

    let calls = h.runner.calls_with("git", "notes.txt");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].has_arg("rm"));
    assert!(h.runner.calls_with("git", "checkout").iter().all(|c| !c.has_arg("notes.txt")));
    assert_eq!(h.runner.calls_with("git", "commit").len(), 1);
}

#[tokio::test]
async fn failed_revert_restores_files_already_touched() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    h.runner
        .reply("git", &["diff", "--numstat"], "1\t1\tREADME.md\n2\t0\tCargo.toml\n")
        .fail("git", &["checkout", "main", "Cargo.toml"], "error: unable to unlink 'Cargo.toml'");
    let detail = h.orch.load_review(&id, None).await.unwrap();
    assert_eq!(detail.out_of_scope, vec!["README.md", "Cargo.toml"]);

    let err = h.orch.revert_files(&detail, &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert!(err.to_string().contains("unable to unlink"));
    assert!(h.runner.calls_with("git", "commit").is_empty());

    let restore = h.runner.calls_with("git", "HEAD");
    assert_eq!(restore.len(), 1);
    assert!(restore[0].command_line().ends_with("checkout HEAD -- README.md Cargo.toml"));
    let trail = h.store.audit_trail(&detail.task.id).unwrap();
    assert!(trail.iter().all(|e| e.kind != AuditKind::Revert));
    assert_eq!(h.orch.get_task(&id).unwrap().status, TaskStatus::Review);
}

#[tokio::test]
async fn accept_does_not_cover_files_that_drift_out_of_scope_later() {
    let h = harness();
    let id = in_review(&h, &["src/**"]).await;
    h.runner
        .reply_times("git", &["diff", "--numstat"], "1\t1\tREADME.md\n", 1)
        .reply("git", &["diff", "--numstat"], "1\t1\tREADME.md\n4\t0\tCargo.toml\n");
    let detail = h.orch.load_review(&id, None).await.unwrap();
    assert_eq!(detail.out_of_scope, vec!["README.md"]);
    h.orch.accept_scope(&detail, Some("docs only")).unwrap();

    let err = h.orch.approve_task(&id, None).await.unwrap_err();
    assert!(matches!(err, DeskError::AlignmentUnresolved { .. }));
    assert_eq!(merges(&h), 0);

    let detail = h.orch.load_review(&id, None).await.unwrap();
    h.orch.accept_scope(&detail, None).unwrap();
    h.orch.approve_task(&id, None).await.unwrap();
    assert_eq!(merges(&h), 1);
}

#[tokio::test]
async fn feedback_is_captured_in_the_audit_trail() {
    let h = harness();
    let id = in_review(&h, &[]).await;
    assert!(matches!(
        h.orch.capture_feedback(&id, ""),
        Err(DeskError::MissingFeedback)
    ));
    h.orch.capture_feedback(&id, "rename the helper").unwrap();
    let task = h.orch.submit_reject(&id, "rename the helper").await.unwrap();
    assert_eq!(task.status, TaskStatus::Todo);

    let kinds: Vec<AuditKind> = h
        .store
        .audit_trail(&task.id)
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![AuditKind::Feedback, AuditKind::Reject]);
}

#[tokio::test]
async fn refresh_marks_exited_worker_done() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    h.orch.start_task(&id).await.unwrap();

    let session = h.orch.refresh(&id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Working);

    h.runner.fail("tmux", &["has-session"], "can't find session");
    let session = h.orch.refresh(&id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Done);
    assert_eq!(h.orch.refresh_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn poll_output_returns_only_new_text() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let session = h.orch.start_task(&id).await.unwrap();

    std::fs::write(&session.log_path, "compiling\n").unwrap();
    assert_eq!(h.orch.poll_output(&id).await.unwrap(), "compiling\n");
    assert_eq!(h.orch.poll_output(&id).await.unwrap(), "");

    std::fs::write(&session.log_path, "compiling\ntests passed\n").unwrap();
    assert_eq!(h.orch.poll_output(&id).await.unwrap(), "tests passed\n");
}

#[tokio::test]
async fn sync_reserves_changed_files_and_reports_conflicts() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    h.orch.start_task(&id).await.unwrap();
    std::fs::create_dir_all(h.dir.path().join(".agentdesk/worktrees").join(&id)).unwrap();
    h.runner
        .reply("git", &["diff", "--name-only"], "src/a.rs\nsrc/b.rs\n")
        .reply("git", &["ls-files"], "notes.txt\n");
    h.orch
        .reservations()
        .acquire("src/b.rs", "alice", "refactor", None)
        .unwrap();

    let report = h.orch.sync_reservations(&id, None).await.unwrap();
    assert_eq!(report.granted, vec!["src/a.rs", "notes.txt"]);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].holder, "alice");
    assert_eq!(
        h.orch.reservations().check("src/a.rs").unwrap().map(|r| r.owner),
        Some(id.clone())
    );
}

#[tokio::test]
async fn cleanup_is_only_for_done_tasks() {
    let h = harness();
    let id = in_review(&h, &[]).await;
    let err = h.orch.cleanup_task(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    h.orch.approve_task(&id, None).await.unwrap();
    let workdir = h.dir.path().join(".agentdesk/worktrees").join(&id);
    std::fs::create_dir_all(&workdir).unwrap();
    h.orch.cleanup_task(&id).await.unwrap();
    assert_eq!(h.runner.calls_with("git", "remove").len(), 1);
}

#[tokio::test]
async fn test_runs_feed_the_review_detail() {
    let h = harness();
    let id = in_review(&h, &[]).await;
    h.orch
        .record_test_run(
            &id,
            agentdesk::common::TestRun {
                passed: 12,
                failed: 0,
                skipped: 1,
                summary: String::new(),
                recorded_at: chrono::Utc::now(),
            },
        )
        .unwrap();
    let detail = h.orch.load_review(&id, None).await.unwrap();
    assert!(detail.tests.unwrap().is_green());
}

#[tokio::test]
async fn assign_moves_todo_to_assigned() {
    let h = harness();
    let id = add_task(&h, "login", &[]);
    let task = h.orch.assign_task(&id, "alice").unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assignee.as_deref(), Some("alice"));

    let err = h.orch.assign_task(&id, "bob").unwrap_err();
    assert!(matches!(err, DeskError::IllegalTransition { .. }));
}

#[tokio::test]
async fn empty_title_is_refused() {
    let h = harness();
    let err = h.orch.create_task(NewTask::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
