use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::status::{SessionState, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub summary: String,
    pub acceptance_criteria: Vec<String>,
    /// Current user-story text.
    pub story: String,
    /// Hash of `story` captured when work started; `None` until then.
    pub story_hash: Option<String>,
    /// Glob patterns describing the minimum scope of the change.
    pub scope: Vec<String>,
    pub assignee: Option<String>,
    /// Reviewer feedback, oldest first.
    pub feedback: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for quick-intake task creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub story: String,
    #[serde(default)]
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub task_id: TaskId,
    pub state: SessionState,
    /// Bytes of the log already handed out by `poll_output`.
    pub log_offset: u64,
    pub workdir: String,
    pub log_path: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub path: String,
    pub owner: String,
    pub reason: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid importance: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub importance: Importance,
    /// Names referenced as `@name` in the subject or body.
    pub mentions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Distinct recipients across `to` and `cc`, in first-seen order.
    pub fn recipients(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in self.to.iter().chain(self.cc.iter()) {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub importance: Importance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub message_id: String,
    pub recipient: String,
    pub delivered_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// A message as seen from one recipient's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message: Message,
    pub delivery: MessageDelivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub task_id: TaskId,
    pub branch: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Feedback,
    Reject,
    Accept,
    Explain,
    Revert,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feedback => "feedback",
            Self::Reject => "reject",
            Self::Accept => "accept",
            Self::Explain => "explain",
            Self::Revert => "revert",
        }
    }

    /// Entries that acknowledge an out-of-scope change.
    pub fn is_override(&self) -> bool {
        matches!(self, Self::Accept | Self::Explain)
    }
}

impl FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "feedback" => Ok(Self::Feedback),
            "reject" => Ok(Self::Reject),
            "accept" => Ok(Self::Accept),
            "explain" => Ok(Self::Explain),
            "revert" => Ok(Self::Revert),
            _ => Err(format!("Invalid audit kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub task_id: TaskId,
    pub kind: AuditKind,
    pub body: String,
    /// Out-of-scope files a scope action was recorded against.
    #[serde(default)]
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRun {
    pub passed: u32,
    pub failed: u32,
    #[serde(default)]
    pub skipped: u32,
    #[serde(default)]
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

impl TestRun {
    pub fn is_green(&self) -> bool {
        self.failed == 0
    }
}
