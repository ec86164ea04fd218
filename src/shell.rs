//! Shell-string construction.
//!
//! Everything else in the crate invokes tools with argv arrays. The one place
//! a shell string is unavoidable is tmux `pipe-pane`, which hands its command
//! to `/bin/sh`. That string is built here and nowhere else:
//!
//! 1. [`validate_log_path`] rejects any path with a character outside the
//!    allow-list (letters, digits, space, `_./'-`). Nothing is escaped at this
//!    stage; a `;`, `$` or backtick means the path is refused outright.
//! 2. [`quote`] single-quotes what survived, so spaces and single quotes are
//!    preserved literally.

use std::borrow::Cow;

use shell_escape::escape;

use crate::errors::{DeskError, Result};

/// Characters allowed in a log path besides ASCII letters and digits.
const LOG_PATH_EXTRA: &[char] = &[' ', '_', '.', '/', '\'', '-'];

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || LOG_PATH_EXTRA.contains(&c)
}

/// Check `path` against the log-path allow-list.
pub fn validate_log_path(path: &str) -> Result<()> {
    if path.trim().is_empty() || !path.chars().all(is_allowed) {
        return Err(DeskError::UnsafeLogPath {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Quote `value` for POSIX sh.
///
/// - `plain/path.log` -> `plain/path.log`
/// - `/tmp/log's dir` -> `'/tmp/log'\''s dir'`
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// The `pipe-pane` command that appends a session's output to `log_path`.
///
/// Validates before building anything, so a rejected path never reaches a
/// command string.
pub fn pipe_command(log_path: &str) -> Result<String> {
    validate_log_path(log_path)?;
    Ok(format!("cat >> {}", quote(log_path)))
}
