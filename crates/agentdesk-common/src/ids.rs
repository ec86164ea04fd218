//! Task identifiers and the names derived from them.
//!
//! A task id ends up as a directory name, a git branch component, a tmux
//! session name and a shell argument, so it is validated once here and every
//! derived name is computed from the validated value.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest id accepted at any boundary.
pub const MAX_TASK_ID_LEN: usize = 64;

/// Prefix applied to derived tmux session names.
pub const SESSION_PREFIX: &str = "ad-";

/// Prefix applied to derived git branch names.
pub const BRANCH_PREFIX: &str = "feature/";

static TASK_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+-?[0-9]+$").expect("task id regex is valid"));

/// Why a candidate task id was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("task id is empty")]
    Empty,

    #[error("task id is {len} characters, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("task id contains a path separator")]
    PathSeparator,

    #[error("task id contains '..'")]
    ParentTraversal,

    #[error("task id does not match PREFIX-NNN")]
    Pattern,
}

/// A validated task id such as `TASK-001` or `T1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Validate `raw` and wrap it.
    ///
    /// The separator and traversal checks run before the pattern so callers get
    /// the most specific reason for hostile input.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if raw.is_empty() {
            return Err(IdError::Empty);
        }
        if raw.len() > MAX_TASK_ID_LEN {
            return Err(IdError::TooLong {
                len: raw.len(),
                max: MAX_TASK_ID_LEN,
            });
        }
        if raw.contains('/') || raw.contains('\\') {
            return Err(IdError::PathSeparator);
        }
        if raw.contains("..") {
            return Err(IdError::ParentTraversal);
        }
        if !TASK_ID_REGEX.is_match(raw) {
            return Err(IdError::Pattern);
        }
        Ok(Self(raw.to_string()))
    }

    /// Build the id for the `number`th task under `prefix`, e.g. `TASK-007`.
    pub fn from_parts(prefix: &str, number: u32) -> Result<Self, IdError> {
        Self::parse(&format!("{}-{:03}", prefix, number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Alphabetic prefix, without the dash.
    pub fn prefix(&self) -> &str {
        self.0
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches('-')
    }

    /// Numeric suffix, if it fits in a `u32`.
    pub fn number(&self) -> Option<u32> {
        let digits = self.0.trim_start_matches(|c: char| !c.is_ascii_digit());
        digits.parse().ok()
    }

    /// Branch the task's work lives on.
    pub fn branch_name(&self) -> String {
        format!("{}{}", BRANCH_PREFIX, self.0)
    }

    /// Session id used when none has been persisted.
    pub fn session_id(&self) -> String {
        format!("{}{}", SESSION_PREFIX, self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prefix_number_forms() {
        for raw in ["TASK-001", "T1", "ad-42", "Bug7"] {
            assert!(TaskId::parse(raw).is_ok(), "{raw} should be valid");
        }
    }

    #[test]
    fn rejects_separators_and_traversal() {
        assert_eq!(TaskId::parse("TASK/1"), Err(IdError::PathSeparator));
        assert_eq!(TaskId::parse("TASK\\1"), Err(IdError::PathSeparator));
        assert_eq!(TaskId::parse("..1"), Err(IdError::ParentTraversal));
        assert_eq!(TaskId::parse("../../etc"), Err(IdError::PathSeparator));
    }

    #[test]
    fn rejects_overlong_ids() {
        let long = format!("T{}", "1".repeat(MAX_TASK_ID_LEN));
        assert!(matches!(
            TaskId::parse(&long),
            Err(IdError::TooLong { max: MAX_TASK_ID_LEN, .. })
        ));
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert_eq!(TaskId::parse("T1;rm"), Err(IdError::Pattern));
        assert_eq!(TaskId::parse("T 1"), Err(IdError::Pattern));
        assert_eq!(TaskId::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn derived_names_are_deterministic() {
        let id = TaskId::parse("TASK-007").unwrap();
        assert_eq!(id.branch_name(), "feature/TASK-007");
        assert_eq!(id.session_id(), "ad-TASK-007");
        assert_eq!(id.prefix(), "TASK");
        assert_eq!(id.number(), Some(7));
    }

    #[test]
    fn from_parts_pads_number() {
        let id = TaskId::from_parts("AD", 12).unwrap();
        assert_eq!(id.as_str(), "AD-012");
    }
}
