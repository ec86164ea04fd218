//! Worker sessions hosted in tmux.
//!
//! A session is a detached tmux session whose pane output is appended to a
//! per-task log file. The engine never talks to the agent directly; it reads
//! that log and asks tmux whether the session is still there.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use crate::errors::{DeskError, Result};
use crate::process::{CommandRunner, argv};
use crate::shell;

/// Abstraction over the terminal multiplexer for testability.
/// Real implementation: `TmuxSessionManager`.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Start `agent_cmd` in a new session rooted at `workdir`, logging to
    /// `log_path`. The log path is validated before any command is built.
    async fn start(&self, session_id: &str, workdir: &Path, log_path: &str, agent_cmd: &str) -> Result<()>;

    /// Stop the session. Succeeds when it is already gone.
    async fn stop(&self, session_id: &str) -> Result<()>;

    async fn is_alive(&self, session_id: &str) -> Result<bool>;
}

pub struct TmuxSessionManager {
    runner: Arc<dyn CommandRunner>,
}

impl TmuxSessionManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn tmux<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S> + Send,
        S: AsRef<str>,
    {
        self.runner.run("tmux", &argv(args)).await
    }
}

#[async_trait]
impl SessionManager for TmuxSessionManager {
    async fn start(&self, session_id: &str, workdir: &Path, log_path: &str, agent_cmd: &str) -> Result<()> {
        let pipe = shell::pipe_command(log_path)?;

        if let Some(parent) = Path::new(log_path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeskError::io(parent, e))?;
        }

        let workdir = workdir.to_string_lossy().into_owned();
        self.tmux(["new-session", "-d", "-s", session_id, "-c", workdir.as_str()])
            .await?;
        self.tmux(["pipe-pane", "-o", "-t", session_id, pipe.as_str()]).await?;
        self.tmux(["send-keys", "-t", session_id, agent_cmd, "Enter"])
            .await?;
        info!(session_id, workdir = %workdir, log_path, "session started");
        Ok(())
    }

    async fn stop(&self, session_id: &str) -> Result<()> {
        if !self.is_alive(session_id).await? {
            debug!(session_id, "session already stopped");
            return Ok(());
        }
        self.tmux(["kill-session", "-t", session_id]).await?;
        info!(session_id, "session stopped");
        Ok(())
    }

    async fn is_alive(&self, session_id: &str) -> Result<bool> {
        match self.tmux(["has-session", "-t", session_id]).await {
            Ok(_) => Ok(true),
            Err(DeskError::ToolFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Read whatever `log_path` holds past `offset`.
///
/// Returns the new text and the offset to resume from. A missing log reads as
/// empty; a log shorter than `offset` (truncated or rotated) is read from the
/// start.
pub async fn read_log_from(log_path: &Path, offset: u64) -> Result<(String, u64)> {
    let mut file = match tokio::fs::File::open(log_path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((String::new(), offset)),
        Err(e) => return Err(DeskError::io(log_path, e)),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| DeskError::io(log_path, e))?
        .len();
    let start = if len < offset { 0 } else { offset };

    file.seek(SeekFrom::Start(start))
        .await
        .map_err(|e| DeskError::io(log_path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .await
        .map_err(|e| DeskError::io(log_path, e))?;

    let next = start + buf.len() as u64;
    Ok((String::from_utf8_lossy(&buf).into_owned(), next))
}
