//! Persistence for tasks, sessions, reservations, mail and review state.

mod sqlite;

pub use sqlite::SqliteStore;

use agentdesk_common::{
    AuditEntry, InboxEntry, Message, MessageDelivery, NewTask, Reservation, ReviewQueueEntry, Session,
    SessionState, Task, TaskId, TaskStatus, TestRun,
};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::errors::{DeskError, Result};

/// Everything the engine persists. Implementations must make
/// [`acquire_reservation`](Store::acquire_reservation) atomic across every
/// handle that shares the same backing data.
pub trait Store: Send + Sync {
    // ── tasks ──
    /// Allocate the next `PREFIX-NNN` id and insert the task in `todo`.
    fn create_task(&self, prefix: &str, new: &NewTask, now: DateTime<Utc>) -> Result<Task>;
    fn insert_task(&self, task: &Task) -> Result<()>;
    fn get_task(&self, id: &TaskId) -> Result<Option<Task>>;
    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>>;
    /// Overwrite every mutable column of an existing task.
    fn update_task(&self, task: &Task) -> Result<()>;

    // ── sessions ──
    fn get_session(&self, task_id: &TaskId) -> Result<Option<Session>>;
    fn upsert_session(&self, session: &Session) -> Result<()>;
    fn set_session_state(&self, task_id: &TaskId, state: SessionState, now: DateTime<Utc>) -> Result<()>;
    fn set_log_offset(&self, task_id: &TaskId, offset: u64, now: DateTime<Utc>) -> Result<()>;

    // ── reservations ──
    /// Grant `reservation` unless another owner holds an unexpired one on the
    /// same path, in which case fail with `ReservationConflict`.
    fn acquire_reservation(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Reservation>;
    fn release_reservation(&self, path: &str, owner: &str) -> Result<bool>;
    fn release_owner(&self, owner: &str) -> Result<usize>;
    fn active_reservations(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>>;
    fn reservation_for(&self, path: &str, now: DateTime<Utc>) -> Result<Option<Reservation>>;

    // ── mailbox ──
    fn insert_message(&self, message: &Message, deliveries: &[MessageDelivery]) -> Result<()>;
    fn inbox(&self, recipient: &str, limit: usize, urgent_only: bool) -> Result<Vec<InboxEntry>>;
    fn messages_mentioning(&self, name: &str, limit: usize) -> Result<Vec<Message>>;
    fn mark_read(&self, message_id: &str, recipient: &str, at: DateTime<Utc>) -> Result<bool>;
    fn unread_count(&self, recipient: &str) -> Result<usize>;

    // ── review ──
    fn enqueue_review(&self, entry: &ReviewQueueEntry) -> Result<()>;
    fn dequeue_review(&self, task_id: &TaskId) -> Result<bool>;
    fn review_entry(&self, task_id: &TaskId) -> Result<Option<ReviewQueueEntry>>;
    fn review_queue(&self) -> Result<Vec<ReviewQueueEntry>>;
    fn append_audit(&self, entry: &AuditEntry) -> Result<()>;
    fn audit_trail(&self, task_id: &TaskId) -> Result<Vec<AuditEntry>>;
    fn record_test_run(&self, task_id: &TaskId, run: &TestRun) -> Result<()>;
    fn latest_test_run(&self, task_id: &TaskId) -> Result<Option<TestRun>>;
}

/// Fixed-width RFC 3339 so stored timestamps compare correctly as text.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DeskError::CorruptRecord(format!("bad timestamp '{}': {}", raw, e)))
}
