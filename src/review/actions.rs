//! Rules for the actions a reviewer can take on an out-of-scope change.
//!
//! While a review is `out`, the reviewer must either accept the extra files,
//! revert them, or explain them before the task can be approved.

use agentdesk_common::{AuditEntry, AuditKind};
use chrono::{DateTime, Utc};

use super::{Alignment, ReviewDetail};
use crate::errors::{DeskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeAction {
    Accept,
    Revert,
    Explain,
}

impl ScopeAction {
    pub fn audit_kind(&self) -> AuditKind {
        match self {
            Self::Accept => AuditKind::Accept,
            Self::Revert => AuditKind::Revert,
            Self::Explain => AuditKind::Explain,
        }
    }
}

/// Scope actions only apply to a detail whose alignment is `out`.
pub fn ensure_out(detail: &ReviewDetail) -> Result<()> {
    if detail.alignment != Alignment::Out {
        return Err(DeskError::AlignmentNotOut {
            id: detail.task.id.to_string(),
            alignment: detail.alignment,
        });
    }
    Ok(())
}

/// Whether an accept or explain entry covers every file in `out_of_scope`.
///
/// An override only counts if it was recorded at or after `since` and
/// named each of those files, so a file that drifts out of scope after the
/// reviewer signed off blocks approval again.
pub fn has_override_for(
    trail: &[AuditEntry],
    since: Option<DateTime<Utc>>,
    out_of_scope: &[String],
) -> bool {
    trail
        .iter()
        .filter(|e| e.kind.is_override())
        .filter(|e| since.is_none_or(|t| e.created_at >= t))
        .any(|e| out_of_scope.iter().all(|f| e.files.contains(f)))
}

/// Files a revert should touch: the requested ones, or every out-of-scope
/// file when none are named. Fails `NothingToRevert` when that set is empty,
/// and `FileNotInReview` for a requested file the review does not contain.
pub fn revert_targets(detail: &ReviewDetail, requested: &[String]) -> Result<Vec<String>> {
    if detail.files.is_empty() {
        return Err(DeskError::NothingToRevert);
    }
    let targets: Vec<String> = if requested.is_empty() {
        detail.out_of_scope.clone()
    } else {
        requested.to_vec()
    };
    if targets.is_empty() {
        return Err(DeskError::NothingToRevert);
    }
    if let Some(missing) = targets.iter().find(|t| !detail.contains_file(t)) {
        return Err(DeskError::FileNotInReview {
            id: detail.task.id.to_string(),
            path: missing.clone(),
        });
    }
    Ok(targets)
}
