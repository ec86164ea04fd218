//! Typed error hierarchy for the orchestration engine.
//!
//! Every failure is a `DeskError`, and every `DeskError` belongs to exactly one
//! `ErrorKind` so callers can choose between retry, abort and fix-the-input
//! without looking at message text:
//! - `Validation`: rejected before any side effect
//! - `Conflict`: held reservation or wrong task state
//! - `ExternalTool`: git/tmux failed; the tool's own message is kept intact
//! - `NotFound`: unknown task, session or file
//! - `Store`: database or local I/O failure

use std::path::PathBuf;

use agentdesk_common::{IdError, TaskStatus, TransitionError};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::review::Alignment;

pub type Result<T, E = DeskError> = std::result::Result<T, E>;

/// Coarse category of a [`DeskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    ExternalTool,
    NotFound,
    Store,
}

#[derive(Debug, Error)]
pub enum DeskError {
    // ── validation ────────────────────────────────────────────────────
    #[error("Invalid task id '{id}': {reason}")]
    InvalidTaskId {
        id: String,
        #[source]
        reason: IdError,
    },

    #[error("Unsafe log path '{path}': only letters, digits, space and _./'- are allowed")]
    UnsafeLogPath { path: String },

    #[error("Workspace path {path} is outside the workspaces root {root}")]
    UnsafeWorkspacePath { path: PathBuf, root: PathBuf },

    #[error("Invalid reservation path '{path}': {message}")]
    InvalidReservationPath { path: String, message: String },

    #[error("Feedback is required to reject a task")]
    MissingFeedback,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ── conflict ──────────────────────────────────────────────────────
    #[error("{path} is reserved by {holder} until {expires_at}")]
    ReservationConflict {
        path: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    #[error("Task {id} is not in review (status: {status})")]
    NotInReview { id: String, status: TaskStatus },

    #[error("Task {id} is not in progress (status: {status})")]
    NotInProgress { id: String, status: TaskStatus },

    #[error("Task {id}: {source}")]
    IllegalTransition {
        id: String,
        #[source]
        source: TransitionError,
    },

    #[error("Task {task_id} already has a live session {session_id}")]
    SessionActive { task_id: String, session_id: String },

    #[error("Task {id} changes files outside its declared scope; accept, revert or explain first")]
    AlignmentUnresolved { id: String },

    #[error("Task {id} alignment is {alignment}, scope actions only apply when it is out")]
    AlignmentNotOut { id: String, alignment: Alignment },

    #[error("no files to revert")]
    NothingToRevert,

    // ── external tool ─────────────────────────────────────────────────
    #[error("{program} {args} failed{}: {message}", .code.map(|c| format!(" (exit {})", c)).unwrap_or_default())]
    ToolFailed {
        program: String,
        args: String,
        code: Option<i32>,
        message: String,
    },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ── not found ─────────────────────────────────────────────────────
    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("File {path} is not part of the review for {id}")]
    FileNotInReview { id: String, path: String },

    // ── store ─────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DeskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTaskId { .. }
            | Self::UnsafeLogPath { .. }
            | Self::UnsafeWorkspacePath { .. }
            | Self::InvalidReservationPath { .. }
            | Self::MissingFeedback
            | Self::InvalidInput(_) => ErrorKind::Validation,

            Self::ReservationConflict { .. }
            | Self::NotInReview { .. }
            | Self::NotInProgress { .. }
            | Self::IllegalTransition { .. }
            | Self::SessionActive { .. }
            | Self::AlignmentUnresolved { .. }
            | Self::AlignmentNotOut { .. }
            | Self::NothingToRevert => ErrorKind::Conflict,

            Self::ToolFailed { .. } | Self::Spawn { .. } => ErrorKind::ExternalTool,

            Self::TaskNotFound { .. }
            | Self::SessionNotFound { .. }
            | Self::FileNotInReview { .. } => ErrorKind::NotFound,

            Self::Database(_) | Self::CorruptRecord(_) | Self::LockPoisoned | Self::Io { .. } => {
                ErrorKind::Store
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn invalid_task_id(id: &str, reason: IdError) -> Self {
        Self::InvalidTaskId {
            id: id.to_string(),
            reason,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
