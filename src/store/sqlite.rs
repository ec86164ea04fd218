use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use agentdesk_common::{
    AuditEntry, AuditKind, Importance, InboxEntry, Message, MessageDelivery, NewTask, Reservation,
    ReviewQueueEntry, Session, SessionState, Task, TaskId, TaskStatus, TestRun,
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use super::{Store, fmt_ts, parse_ts};
use crate::errors::{DeskError, Result};

/// How long a connection waits on another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Forward-only schema steps. Each runs once, in order, inside the same
/// transaction that records its version.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "
        CREATE TABLE tasks (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'todo',
            summary TEXT NOT NULL DEFAULT '',
            acceptance_criteria TEXT NOT NULL DEFAULT '[]',
            story TEXT NOT NULL DEFAULT '',
            story_hash TEXT,
            scope TEXT NOT NULL DEFAULT '[]',
            assignee TEXT,
            feedback TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE sessions (
            task_id TEXT PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            id TEXT NOT NULL,
            state TEXT NOT NULL,
            log_offset INTEGER NOT NULL DEFAULT 0,
            workdir TEXT NOT NULL,
            log_path TEXT NOT NULL,
            started_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE reservations (
            path TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX idx_tasks_status ON tasks(status);
        CREATE INDEX idx_reservations_owner ON reservations(owner);
        ",
    ),
    (
        2,
        "
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            recipients_to TEXT NOT NULL DEFAULT '[]',
            recipients_cc TEXT NOT NULL DEFAULT '[]',
            subject TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '',
            importance TEXT NOT NULL DEFAULT 'normal',
            mentions TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );

        CREATE TABLE deliveries (
            message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            recipient TEXT NOT NULL,
            delivered_at TEXT NOT NULL,
            read_at TEXT,
            PRIMARY KEY (message_id, recipient)
        );

        CREATE INDEX idx_deliveries_recipient ON deliveries(recipient);
        CREATE INDEX idx_messages_created ON messages(created_at);
        ",
    ),
    (
        3,
        "
        CREATE TABLE review_queue (
            task_id TEXT PRIMARY KEY REFERENCES tasks(id) ON DELETE CASCADE,
            branch TEXT NOT NULL,
            enqueued_at TEXT NOT NULL
        );

        CREATE TABLE audit_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE test_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            passed INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            skipped INTEGER NOT NULL DEFAULT 0,
            summary TEXT NOT NULL DEFAULT '',
            recorded_at TEXT NOT NULL
        );

        CREATE INDEX idx_audit_task ON audit_entries(task_id);
        CREATE INDEX idx_test_runs_task ON test_runs(task_id);
        ",
    ),
    (
        2,
        "ALTER TABLE audit_entries ADD COLUMN files TEXT NOT NULL DEFAULT '[]';",
    ),
];

/// SQLite-backed [`Store`].
///
/// One connection per handle, guarded by a mutex. Several handles (or
/// processes) may open the same file; writers that race on a reservation are
/// serialised by SQLite's write lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| DeskError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DeskError::LockPoisoned)
    }

    /// Highest applied migration.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }
}

fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: i64 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
            params![version, fmt_ts(Utc::now())],
        )?;
        debug!(version, "applied migration");
    }
    tx.commit()?;
    Ok(())
}

fn to_json(list: &[String]) -> Result<String> {
    serde_json::to_string(list).map_err(|e| DeskError::CorruptRecord(e.to_string()))
}

fn from_json(raw: &str, column: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| DeskError::CorruptRecord(format!("{} is not a JSON list: {}", column, e)))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    T::from_str(raw).map_err(DeskError::CorruptRecord)
}

const TASK_COLUMNS: &str = "id, title, status, summary, acceptance_criteria, story, story_hash, scope, assignee, feedback, created_at, updated_at";

/// Intermediate row struct for tasks.
struct TaskRow {
    id: String,
    title: String,
    status: String,
    summary: String,
    acceptance_criteria: String,
    story: String,
    story_hash: Option<String>,
    scope: String,
    assignee: Option<String>,
    feedback: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            status: row.get(2)?,
            summary: row.get(3)?,
            acceptance_criteria: row.get(4)?,
            story: row.get(5)?,
            story_hash: row.get(6)?,
            scope: row.get(7)?,
            assignee: row.get(8)?,
            feedback: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        let id = TaskId::parse(&self.id)
            .map_err(|e| DeskError::CorruptRecord(format!("task id '{}': {}", self.id, e)))?;
        Ok(Task {
            id,
            title: self.title,
            status: parse_enum(&self.status)?,
            summary: self.summary,
            acceptance_criteria: from_json(&self.acceptance_criteria, "acceptance_criteria")?,
            story: self.story,
            story_hash: self.story_hash,
            scope: from_json(&self.scope, "scope")?,
            assignee: self.assignee,
            feedback: from_json(&self.feedback, "feedback")?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// Intermediate row struct for sessions.
struct SessionRow {
    id: String,
    task_id: String,
    state: String,
    log_offset: i64,
    workdir: String,
    log_path: String,
    started_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let task_id = TaskId::parse(&self.task_id)
            .map_err(|e| DeskError::CorruptRecord(format!("session task id: {}", e)))?;
        Ok(Session {
            id: self.id,
            task_id,
            state: parse_enum::<SessionState>(&self.state)?,
            log_offset: u64::try_from(self.log_offset).unwrap_or_default(),
            workdir: self.workdir,
            log_path: self.log_path,
            started_at: parse_ts(&self.started_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn reservation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_reservation(raw: (String, String, String, String, String)) -> Result<Reservation> {
    let (path, owner, reason, expires_at, created_at) = raw;
    Ok(Reservation {
        path,
        owner,
        reason,
        expires_at: parse_ts(&expires_at)?,
        created_at: parse_ts(&created_at)?,
    })
}

/// Intermediate row struct for messages.
struct MessageRow {
    id: String,
    sender: String,
    to: String,
    cc: String,
    subject: String,
    body: String,
    importance: String,
    mentions: String,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender: row.get(1)?,
            to: row.get(2)?,
            cc: row.get(3)?,
            subject: row.get(4)?,
            body: row.get(5)?,
            importance: row.get(6)?,
            mentions: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id,
            sender: self.sender,
            to: from_json(&self.to, "recipients_to")?,
            cc: from_json(&self.cc, "recipients_cc")?,
            subject: self.subject,
            body: self.body,
            importance: parse_enum::<Importance>(&self.importance)?,
            mentions: from_json(&self.mentions, "mentions")?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "m.id, m.sender, m.recipients_to, m.recipients_cc, m.subject, m.body, m.importance, m.mentions, m.created_at";

fn next_task_number(conn: &Connection, prefix: &str) -> Result<u32> {
    let mut stmt = conn.prepare("SELECT id FROM tasks WHERE id LIKE ?1")?;
    let ids = stmt.query_map(params![format!("{}-%", prefix)], |row| row.get::<_, String>(0))?;
    let mut max = 0;
    for id in ids {
        let id = id?;
        if let Ok(id) = TaskId::parse(&id)
            && id.prefix() == prefix
            && let Some(n) = id.number()
        {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

impl Store for SqliteStore {
    fn create_task(&self, prefix: &str, new: &NewTask, now: DateTime<Utc>) -> Result<Task> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let number = next_task_number(&tx, prefix)?;
        let id = TaskId::from_parts(prefix, number)
            .map_err(|e| DeskError::InvalidInput(format!("id prefix '{}': {}", prefix, e)))?;
        let task = Task {
            id,
            title: new.title.clone(),
            status: TaskStatus::Todo,
            summary: new.summary.clone(),
            acceptance_criteria: new.acceptance_criteria.clone(),
            story: new.story.clone(),
            story_hash: None,
            scope: new.scope.clone(),
            assignee: None,
            feedback: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        insert_task_row(&tx, &task)?;
        tx.commit()?;
        Ok(task)
    }

    fn insert_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        insert_task_row(&conn, task)
    }

    fn get_task(&self, id: &TaskId) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![id.as_str()],
                TaskRow::from_row,
            )
            .optional()?;
        row.map(TaskRow::into_task).transpose()
    }

    fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM tasks WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, id",
            TASK_COLUMNS
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], TaskRow::from_row)?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.into_task()?);
        }
        Ok(tasks)
    }

    fn update_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET title = ?1, status = ?2, summary = ?3, acceptance_criteria = ?4,
                story = ?5, story_hash = ?6, scope = ?7, assignee = ?8, feedback = ?9, updated_at = ?10
             WHERE id = ?11",
            params![
                task.title,
                task.status.as_str(),
                task.summary,
                to_json(&task.acceptance_criteria)?,
                task.story,
                task.story_hash,
                to_json(&task.scope)?,
                task.assignee,
                to_json(&task.feedback)?,
                fmt_ts(task.updated_at),
                task.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(DeskError::TaskNotFound {
                id: task.id.to_string(),
            });
        }
        Ok(())
    }

    fn get_session(&self, task_id: &TaskId) -> Result<Option<Session>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, task_id, state, log_offset, workdir, log_path, started_at, updated_at
                 FROM sessions WHERE task_id = ?1",
                params![task_id.as_str()],
                |row| {
                    Ok(SessionRow {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        state: row.get(2)?,
                        log_offset: row.get(3)?,
                        workdir: row.get(4)?,
                        log_path: row.get(5)?,
                        started_at: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn upsert_session(&self, session: &Session) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (task_id, id, state, log_offset, workdir, log_path, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(task_id) DO UPDATE SET
                id = excluded.id, state = excluded.state, log_offset = excluded.log_offset,
                workdir = excluded.workdir, log_path = excluded.log_path,
                started_at = excluded.started_at, updated_at = excluded.updated_at",
            params![
                session.task_id.as_str(),
                session.id,
                session.state.as_str(),
                i64::try_from(session.log_offset).unwrap_or(i64::MAX),
                session.workdir,
                session.log_path,
                fmt_ts(session.started_at),
                fmt_ts(session.updated_at),
            ],
        )?;
        Ok(())
    }

    fn set_session_state(&self, task_id: &TaskId, state: SessionState, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sessions SET state = ?1, updated_at = ?2 WHERE task_id = ?3",
            params![state.as_str(), fmt_ts(now), task_id.as_str()],
        )?;
        if changed == 0 {
            return Err(DeskError::SessionNotFound {
                id: task_id.session_id(),
            });
        }
        Ok(())
    }

    fn set_log_offset(&self, task_id: &TaskId, offset: u64, now: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sessions SET log_offset = ?1, updated_at = ?2 WHERE task_id = ?3",
            params![i64::try_from(offset).unwrap_or(i64::MAX), fmt_ts(now), task_id.as_str()],
        )?;
        Ok(())
    }

    fn acquire_reservation(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<Reservation> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front, so the read below and the
        // write after it cannot interleave with another connection's acquire.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing = tx
            .query_row(
                "SELECT path, owner, reason, expires_at, created_at FROM reservations WHERE path = ?1",
                params![reservation.path],
                reservation_from_row,
            )
            .optional()?
            .map(into_reservation)
            .transpose()?;

        if let Some(held) = existing
            && held.owner != reservation.owner
            && !held.is_expired_at(now)
        {
            return Err(DeskError::ReservationConflict {
                path: held.path,
                holder: held.owner,
                expires_at: held.expires_at,
            });
        }

        tx.execute(
            "INSERT INTO reservations (path, owner, reason, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(path) DO UPDATE SET
                owner = excluded.owner, reason = excluded.reason,
                expires_at = excluded.expires_at, created_at = excluded.created_at",
            params![
                reservation.path,
                reservation.owner,
                reservation.reason,
                fmt_ts(reservation.expires_at),
                fmt_ts(reservation.created_at),
            ],
        )?;
        tx.commit()?;
        Ok(reservation.clone())
    }

    fn release_reservation(&self, path: &str, owner: &str) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM reservations WHERE path = ?1 AND owner = ?2",
            params![path, owner],
        )?;
        Ok(n > 0)
    }

    fn release_owner(&self, owner: &str) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM reservations WHERE owner = ?1", params![owner])?)
    }

    fn active_reservations(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT path, owner, reason, expires_at, created_at FROM reservations
             WHERE expires_at > ?1 ORDER BY created_at DESC, path LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            params![fmt_ts(now), i64::try_from(limit).unwrap_or(i64::MAX)],
            reservation_from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(into_reservation(row?)?);
        }
        Ok(out)
    }

    fn reservation_for(&self, path: &str, now: DateTime<Utc>) -> Result<Option<Reservation>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT path, owner, reason, expires_at, created_at FROM reservations
             WHERE path = ?1 AND expires_at > ?2",
            params![path, fmt_ts(now)],
            reservation_from_row,
        )
        .optional()?
        .map(into_reservation)
        .transpose()
    }

    fn insert_message(&self, message: &Message, deliveries: &[MessageDelivery]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO messages (id, sender, recipients_to, recipients_cc, subject, body, importance, mentions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.sender,
                to_json(&message.to)?,
                to_json(&message.cc)?,
                message.subject,
                message.body,
                message.importance.as_str(),
                to_json(&message.mentions)?,
                fmt_ts(message.created_at),
            ],
        )?;
        for delivery in deliveries {
            tx.execute(
                "INSERT INTO deliveries (message_id, recipient, delivered_at, read_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    delivery.message_id,
                    delivery.recipient,
                    fmt_ts(delivery.delivered_at),
                    delivery.read_at.map(fmt_ts),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn inbox(&self, recipient: &str, limit: usize, urgent_only: bool) -> Result<Vec<InboxEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {}, d.recipient, d.delivered_at, d.read_at
             FROM deliveries d JOIN messages m ON m.id = d.message_id
             WHERE d.recipient = ?1 AND (?2 = 0 OR m.importance = 'urgent')
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![recipient, urgent_only, i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                let message = MessageRow::from_row(row)?;
                let delivery: (String, String, Option<String>) = (row.get(9)?, row.get(10)?, row.get(11)?);
                Ok((message, delivery))
            },
        )?;

        let mut out = Vec::new();
        for row in rows {
            let (message, (recipient, delivered_at, read_at)) = row?;
            let message = message.into_message()?;
            let delivery = MessageDelivery {
                message_id: message.id.clone(),
                recipient,
                delivered_at: parse_ts(&delivered_at)?,
                read_at: read_at.as_deref().map(parse_ts).transpose()?,
            };
            out.push(InboxEntry { message, delivery });
        }
        Ok(out)
    }

    fn messages_mentioning(&self, name: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages m
             WHERE EXISTS (SELECT 1 FROM json_each(m.mentions) WHERE json_each.value = ?1)
             ORDER BY m.created_at DESC, m.rowid DESC
             LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![name, i64::try_from(limit).unwrap_or(i64::MAX)],
            MessageRow::from_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.into_message()?);
        }
        Ok(out)
    }

    fn mark_read(&self, message_id: &str, recipient: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "UPDATE deliveries SET read_at = COALESCE(read_at, ?1)
             WHERE message_id = ?2 AND recipient = ?3",
            params![fmt_ts(at), message_id, recipient],
        )?;
        Ok(n > 0)
    }

    fn unread_count(&self, recipient: &str) -> Result<usize> {
        let conn = self.lock()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM deliveries WHERE recipient = ?1 AND read_at IS NULL",
            params![recipient],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    fn enqueue_review(&self, entry: &ReviewQueueEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO review_queue (task_id, branch, enqueued_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET branch = excluded.branch, enqueued_at = excluded.enqueued_at",
            params![entry.task_id.as_str(), entry.branch, fmt_ts(entry.enqueued_at)],
        )?;
        Ok(())
    }

    fn dequeue_review(&self, task_id: &TaskId) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM review_queue WHERE task_id = ?1",
            params![task_id.as_str()],
        )?;
        Ok(n > 0)
    }

    fn review_entry(&self, task_id: &TaskId) -> Result<Option<ReviewQueueEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT branch, enqueued_at FROM review_queue WHERE task_id = ?1",
                params![task_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(branch, enqueued_at)| {
            Ok(ReviewQueueEntry {
                task_id: task_id.clone(),
                branch,
                enqueued_at: parse_ts(&enqueued_at)?,
            })
        })
        .transpose()
    }

    fn review_queue(&self) -> Result<Vec<ReviewQueueEntry>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT task_id, branch, enqueued_at FROM review_queue ORDER BY enqueued_at, task_id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (task_id, branch, enqueued_at) = row?;
            out.push(ReviewQueueEntry {
                task_id: TaskId::parse(&task_id)
                    .map_err(|e| DeskError::CorruptRecord(format!("queued task id: {}", e)))?,
                branch,
                enqueued_at: parse_ts(&enqueued_at)?,
            });
        }
        Ok(out)
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_entries (task_id, kind, body, files, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.task_id.as_str(),
                entry.kind.as_str(),
                entry.body,
                to_json(&entry.files)?,
                fmt_ts(entry.created_at)
            ],
        )?;
        Ok(())
    }

    fn audit_trail(&self, task_id: &TaskId) -> Result<Vec<AuditEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT kind, body, files, created_at FROM audit_entries WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![task_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (kind, body, files, created_at) = row?;
            out.push(AuditEntry {
                task_id: task_id.clone(),
                kind: parse_enum::<AuditKind>(&kind)?,
                body,
                files: from_json(&files, "audit_entries.files")?,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(out)
    }

    fn record_test_run(&self, task_id: &TaskId, run: &TestRun) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO test_runs (task_id, passed, failed, skipped, summary, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                task_id.as_str(),
                run.passed,
                run.failed,
                run.skipped,
                run.summary,
                fmt_ts(run.recorded_at)
            ],
        )?;
        Ok(())
    }

    fn latest_test_run(&self, task_id: &TaskId) -> Result<Option<TestRun>> {
        let conn = self.lock()?;
        let row: Option<(u32, u32, u32, String, String)> = conn
            .query_row(
                "SELECT passed, failed, skipped, summary, recorded_at FROM test_runs
                 WHERE task_id = ?1 ORDER BY recorded_at DESC, id DESC LIMIT 1",
                params![task_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;
        row.map(|(passed, failed, skipped, summary, recorded_at)| {
            Ok(TestRun {
                passed,
                failed,
                skipped,
                summary,
                recorded_at: parse_ts(&recorded_at)?,
            })
        })
        .transpose()
    }
}

fn insert_task_row(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            TASK_COLUMNS
        ),
        params![
            task.id.as_str(),
            task.title,
            task.status.as_str(),
            task.summary,
            to_json(&task.acceptance_criteria)?,
            task.story,
            task.story_hash,
            to_json(&task.scope)?,
            task.assignee,
            to_json(&task.feedback)?,
            fmt_ts(task.created_at),
            fmt_ts(task.updated_at),
        ],
    )?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    fn new_task(title: &str) -> NewTask {
        NewTask {
            title: title.into(),
            scope: vec!["src/**".into()],
            acceptance_criteria: vec!["builds".into()],
            ..Default::default()
        }
    }

    fn reservation(path: &str, owner: &str, now: DateTime<Utc>, ttl_secs: i64) -> Reservation {
        Reservation {
            path: path.into(),
            owner: owner.into(),
            reason: String::new(),
            expires_at: now + chrono::Duration::seconds(ttl_secs),
            created_at: now,
        }
    }

    #[test]
    fn migrations_are_idempotent() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentdesk.db");
        let first = SqliteStore::open(&path)?;
        assert_eq!(first.schema_version()?, MIGRATIONS.len() as i64);
        drop(first);

        let second = SqliteStore::open(&path)?;
        assert_eq!(second.schema_version()?, MIGRATIONS.len() as i64);
        let rows: i64 = second.lock()?.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))?;
        assert_eq!(rows, MIGRATIONS.len() as i64);
        Ok(())
    }

    #[test]
    fn create_task_allocates_sequential_ids() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        let a = store.create_task("TASK", &new_task("first"), now)?;
        let b = store.create_task("TASK", &new_task("second"), now)?;
        let other = store.create_task("BUG", &new_task("bug"), now)?;
        assert_eq!(a.id.as_str(), "TASK-001");
        assert_eq!(b.id.as_str(), "TASK-002");
        assert_eq!(other.id.as_str(), "BUG-001");

        let fetched = store.get_task(&b.id)?.expect("task should exist");
        assert_eq!(fetched.title, "second");
        assert_eq!(fetched.status, TaskStatus::Todo);
        assert_eq!(fetched.scope, vec!["src/**"]);
        Ok(())
    }

    #[test]
    fn update_task_round_trips_lists_and_status() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let mut task = store.create_task("T", &new_task("x"), Utc::now())?;
        task.status = TaskStatus::Assigned;
        task.assignee = Some("alice".into());
        task.feedback.push("Needs work".into());
        store.update_task(&task)?;

        let fetched = store.get_task(&task.id)?.expect("task should exist");
        assert_eq!(fetched.status, TaskStatus::Assigned);
        assert_eq!(fetched.assignee.as_deref(), Some("alice"));
        assert_eq!(fetched.feedback, vec!["Needs work"]);

        assert_eq!(store.list_tasks(Some(TaskStatus::Assigned))?.len(), 1);
        assert!(store.list_tasks(Some(TaskStatus::Done))?.is_empty());
        Ok(())
    }

    #[test]
    fn update_of_unknown_task_is_not_found() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let mut task = store.create_task("T", &new_task("x"), Utc::now())?;
        task.id = TaskId::parse("T-999").unwrap();
        assert!(matches!(store.update_task(&task), Err(DeskError::TaskNotFound { .. })));
        Ok(())
    }

    #[test]
    fn conflicting_reservation_reports_holder() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        store.acquire_reservation(&reservation("src/lib.rs", "alice", now, 60), now)?;

        let err = store
            .acquire_reservation(&reservation("src/lib.rs", "bob", now, 60), now)
            .unwrap_err();
        match err {
            DeskError::ReservationConflict { holder, path, .. } => {
                assert_eq!(holder, "alice");
                assert_eq!(path, "src/lib.rs");
            }
            other => panic!("Expected ReservationConflict, got {other:?}"),
        }

        // Same owner renews.
        let renewed = store.acquire_reservation(&reservation("src/lib.rs", "alice", now, 600), now)?;
        assert_eq!(renewed.owner, "alice");
        Ok(())
    }

    #[test]
    fn expired_reservation_is_reclaimable() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let then = Utc::now() - chrono::Duration::seconds(120);
        store.acquire_reservation(&reservation("src/a.rs", "alice", then, 60), then)?;

        let now = Utc::now();
        assert!(store.reservation_for("src/a.rs", now)?.is_none());
        assert!(store.active_reservations(now, 10)?.is_empty());
        let granted = store.acquire_reservation(&reservation("src/a.rs", "bob", now, 60), now)?;
        assert_eq!(granted.owner, "bob");
        Ok(())
    }

    #[test]
    fn concurrent_acquire_has_exactly_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentdesk.db");
        // Create the schema once before the race.
        drop(SqliteStore::open(&path).unwrap());

        for round in 0..20 {
            let target = format!("src/contended_{}.rs", round);
            let barrier = Arc::new(Barrier::new(2));
            let handles: Vec<_> = ["alice", "bob"]
                .into_iter()
                .map(|owner| {
                    let path = path.clone();
                    let target = target.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let store = SqliteStore::open(&path).unwrap();
                        barrier.wait();
                        let now = Utc::now();
                        store.acquire_reservation(&reservation(&target, owner, now, 60), now)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1, "round {round}: {results:?}");
            assert!(
                results
                    .iter()
                    .any(|r| matches!(r, Err(DeskError::ReservationConflict { .. })))
            );
        }
    }

    #[test]
    fn release_only_removes_own_reservation() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        store.acquire_reservation(&reservation("a", "alice", now, 60), now)?;
        store.acquire_reservation(&reservation("b", "alice", now, 60), now)?;
        assert!(!store.release_reservation("a", "bob")?);
        assert!(store.release_reservation("a", "alice")?);
        assert_eq!(store.release_owner("alice")?, 1);
        assert!(store.active_reservations(now, 10)?.is_empty());
        Ok(())
    }

    #[test]
    fn review_queue_and_audit_trail() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        let task = store.create_task("T", &new_task("x"), now)?;
        store.enqueue_review(&ReviewQueueEntry {
            task_id: task.id.clone(),
            branch: task.id.branch_name(),
            enqueued_at: now,
        })?;
        assert_eq!(store.review_queue()?.len(), 1);
        assert_eq!(
            store.review_entry(&task.id)?.map(|e| e.branch),
            Some("feature/T-001".to_string())
        );

        store.append_audit(&AuditEntry {
            task_id: task.id.clone(),
            kind: AuditKind::Feedback,
            body: "tighten error handling".into(),
            files: Vec::new(),
            created_at: now,
        })?;
        store.append_audit(&AuditEntry {
            task_id: task.id.clone(),
            kind: AuditKind::Accept,
            body: "fine".into(),
            files: vec!["README.md".into()],
            created_at: now,
        })?;
        let trail = store.audit_trail(&task.id)?;
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].kind, AuditKind::Feedback);
        assert!(trail[0].files.is_empty());
        assert_eq!(trail[1].files, vec!["README.md"]);

        assert!(store.dequeue_review(&task.id)?);
        assert!(!store.dequeue_review(&task.id)?);
        assert!(store.review_queue()?.is_empty());
        Ok(())
    }

    #[test]
    fn latest_test_run_wins() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        let task = store.create_task("T", &new_task("x"), now)?;
        assert!(store.latest_test_run(&task.id)?.is_none());
        for (failed, offset) in [(3, 0), (0, 1)] {
            store.record_test_run(
                &task.id,
                &TestRun {
                    passed: 10,
                    failed,
                    skipped: 0,
                    summary: String::new(),
                    recorded_at: now + chrono::Duration::seconds(offset),
                },
            )?;
        }
        let latest = store.latest_test_run(&task.id)?.expect("run recorded");
        assert!(latest.is_green());
        Ok(())
    }

    #[test]
    fn session_upsert_and_state() -> Result<()> {
        let store = SqliteStore::in_memory()?;
        let now = Utc::now();
        let task = store.create_task("T", &new_task("x"), now)?;
        store.upsert_session(&Session {
            id: task.id.session_id(),
            task_id: task.id.clone(),
            state: SessionState::Working,
            log_offset: 0,
            workdir: "/ws/T-001".into(),
            log_path: "/logs/T-001.log".into(),
            started_at: now,
            updated_at: now,
        })?;
        store.set_log_offset(&task.id, 42, now)?;
        store.set_session_state(&task.id, SessionState::Stopped, now)?;

        let session = store.get_session(&task.id)?.expect("session exists");
        assert_eq!(session.state, SessionState::Stopped);
        assert_eq!(session.log_offset, 42);
        assert_eq!(session.id, "ad-T-001");
        Ok(())
    }
}
