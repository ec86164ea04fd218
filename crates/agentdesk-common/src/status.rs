use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    Assigned,
    InProgress,
    Review,
    Blocked,
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        Self::Todo,
        Self::Assigned,
        Self::InProgress,
        Self::Review,
        Self::Blocked,
        Self::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Review => "review",
            Self::Blocked => "blocked",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(Self::Todo),
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "blocked" => Ok(Self::Blocked),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// A status change that is not in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal task transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// The complete transition table. Every pair is spelled out so adding a
/// status forces a decision here.
pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    match (from, to) {
        (Todo, Assigned) => true,
        (Assigned, InProgress) => true,
        (InProgress, Review) => true,
        (Review, Done) => true,
        (Review, Todo) => true,
        (InProgress, Blocked) => true,
        (Blocked, InProgress) => true,
        (Todo, _)
        | (Assigned, _)
        | (InProgress, _)
        | (Review, _)
        | (Blocked, _)
        | (Done, _) => false,
    }
}

/// `Ok(to)` when `from -> to` is legal.
pub fn transition(from: TaskStatus, to: TaskStatus) -> Result<TaskStatus, TransitionError> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(TransitionError { from, to })
    }
}

/// State of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Working,
    Paused,
    Done,
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Stopped => "stopped",
        }
    }

    /// A worker is (or may still be) attached to the session.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Working | Self::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "paused" => Ok(Self::Paused),
            "done" => Ok(Self::Done),
            "stopped" => Ok(Self::Stopped),
            _ => Err(format!("Invalid session state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use TaskStatus::*;
        let legal = [
            (Todo, Assigned),
            (Assigned, InProgress),
            (InProgress, Review),
            (Review, Done),
            (Review, Todo),
            (InProgress, Blocked),
            (Blocked, InProgress),
        ];
        for (from, to) in legal {
            assert!(is_valid_transition(from, to), "{from} -> {to}");
        }
    }

    #[test]
    fn test_everything_else_is_illegal() {
        let mut legal = 0;
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                if is_valid_transition(from, to) {
                    legal += 1;
                }
            }
        }
        assert_eq!(legal, 7);
        assert_eq!(
            transition(TaskStatus::Done, TaskStatus::Todo),
            Err(TransitionError {
                from: TaskStatus::Done,
                to: TaskStatus::Todo
            })
        );
        assert!(!is_valid_transition(TaskStatus::Todo, TaskStatus::InProgress));
        assert!(!is_valid_transition(TaskStatus::Blocked, TaskStatus::Review));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("in-progress".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_session_state_liveness() {
        assert!(SessionState::Working.is_live());
        assert!(SessionState::Paused.is_live());
        assert!(!SessionState::Done.is_live());
        assert!(!SessionState::Done.is_stopped());
        assert!(SessionState::Stopped.is_stopped());
    }
}
