//! Review of finished work before it is merged.
//!
//! A [`ReviewDetail`] is rebuilt from the repository and the store every time
//! it is asked for: per-file diff stats, the latest test run, the acceptance
//! criteria, whether the story changed since work began, and how the touched
//! files line up with the task's declared scope.
//!
//! ## Components
//!
//! - [`loader`]: builds a `ReviewDetail` for a task branch
//! - [`diff`]: paginated per-file diff browsing with retained scroll offsets
//! - [`actions`]: the scope override rules applied when alignment is `out`
//!
//! ## Example
//!
//! ```
//! use agentdesk::review::{Alignment, classify_alignment};
//!
//! let scope = vec!["src/auth/**".to_string()];
//! let files = vec!["src/auth/login.rs".to_string(), "Cargo.toml".to_string()];
//!
//! let (alignment, outside) = classify_alignment(&scope, &files);
//! assert_eq!(alignment, Alignment::Out);
//! assert_eq!(outside, vec!["Cargo.toml"]);
//! ```

pub mod actions;
pub mod diff;
pub mod loader;

pub use actions::{ScopeAction, ensure_out, has_override_for, revert_targets};
pub use diff::{DiffBrowser, DiffPage};
pub use loader::{GitReviewLoader, ReviewLoader};

use std::fmt;
use std::str::FromStr;

use agentdesk_common::{Task, TestRun};
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::git::FileStat;

/// How the files a task touched relate to its declared scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Every touched file is inside the scope.
    Mvp,
    /// At least one touched file is outside the scope.
    Out,
    /// The task declares no scope.
    Unknown,
}

impl Alignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mvp => "mvp",
            Self::Out => "out",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mvp" => Ok(Self::Mvp),
            "out" => Ok(Self::Out),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid alignment: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewDetail {
    pub task: Task,
    pub branch: String,
    pub base_branch: String,
    pub files: Vec<FileStat>,
    /// Latest recorded test run, if any.
    pub tests: Option<TestRun>,
    pub criteria: Vec<String>,
    pub story_drift: bool,
    pub alignment: Alignment,
    pub out_of_scope: Vec<String>,
    /// When the task entered the review queue.
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl ReviewDetail {
    pub fn total_added(&self) -> u64 {
        self.files.iter().map(|f| u64::from(f.added)).sum()
    }

    pub fn total_deleted(&self) -> u64 {
        self.files.iter().map(|f| u64::from(f.deleted)).sum()
    }

    pub fn file_paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    pub fn contains_file(&self, path: &str) -> bool {
        self.files.iter().any(|f| f.path == path)
    }
}

/// Classify `files` against `scope`, returning the files that fall outside.
///
/// Scope entries are glob patterns; an entry ending in `/` covers everything
/// below that directory. An entry that is not a valid pattern only matches
/// itself.
pub fn classify_alignment(scope: &[String], files: &[String]) -> (Alignment, Vec<String>) {
    if scope.iter().all(|s| s.trim().is_empty()) {
        return (Alignment::Unknown, Vec::new());
    }
    let matchers: Vec<ScopeMatcher> = scope
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(ScopeMatcher::new)
        .collect();

    let outside: Vec<String> = files
        .iter()
        .filter(|f| !matchers.iter().any(|m| m.matches(f)))
        .cloned()
        .collect();

    if outside.is_empty() {
        (Alignment::Mvp, outside)
    } else {
        (Alignment::Out, outside)
    }
}

enum ScopeMatcher {
    Dir(String),
    Glob(Pattern),
    Literal(String),
}

impl ScopeMatcher {
    fn new(entry: &str) -> Self {
        if entry.ends_with('/') {
            return Self::Dir(entry.to_string());
        }
        match Pattern::new(entry) {
            Ok(p) => Self::Glob(p),
            Err(_) => Self::Literal(entry.to_string()),
        }
    }

    fn matches(&self, file: &str) -> bool {
        match self {
            Self::Dir(prefix) => file.starts_with(prefix.as_str()),
            Self::Glob(p) => p.matches(file),
            Self::Literal(s) => s == file,
        }
    }
}

/// Hex SHA-256 of the story text.
pub fn story_hash(story: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(story.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether the story changed since its hash was captured. A task that never
/// started has nothing to drift from.
pub fn story_drift(task: &Task) -> bool {
    match &task.story_hash {
        Some(hash) => *hash != story_hash(&task.story),
        None => false,
    }
}
