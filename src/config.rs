//! Configuration for agentdesk.
//!
//! Settings live in `.agentdesk/agentdesk.toml`. Every field has a default, so
//! a missing file or a partial one is fine. Values are layered file →
//! environment → CLI, later layers winning.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! base_branch = "main"
//! id_prefix = "TASK"
//!
//! [workspace]
//! root = ".agentdesk/worktrees"
//!
//! [session]
//! agent_cmd = "claude"
//! log_dir = ".agentdesk/logs"
//!
//! [reservations]
//! default_ttl_secs = 3600
//!
//! [review]
//! page_size = 40
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reservations::MAX_TTL_SECS;

/// Directory under the project root that holds all agentdesk state.
pub const DESK_DIR: &str = ".agentdesk";
pub const CONFIG_FILE: &str = "agentdesk.toml";
pub const DB_FILE: &str = "agentdesk.db";
/// Directory under [`DESK_DIR`] for agentdesk's own diagnostic log, kept
/// apart from the per-task session logs.
pub const TRACE_DIR: &str = "trace";

pub const ENV_BASE_BRANCH: &str = "AGENTDESK_BASE_BRANCH";
pub const ENV_AGENT_CMD: &str = "AGENTDESK_AGENT_CMD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Branch that approved work is merged into.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Prefix for ids allocated by quick-intake (`TASK` -> `TASK-001`).
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_id_prefix() -> String {
    "TASK".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            id_prefix: default_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSection {
    /// Directory holding one worktree per task. Relative to the project root.
    #[serde(default = "default_workspace_root")]
    pub root: String,
}

fn default_workspace_root() -> String {
    format!("{}/worktrees", DESK_DIR)
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    /// Command typed into each new session to launch the agent.
    #[serde(default = "default_agent_cmd")]
    pub agent_cmd: String,
    /// Directory for per-task session logs. Relative to the project root.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_agent_cmd() -> String {
    "claude".to_string()
}

fn default_log_dir() -> String {
    format!("{}/logs", DESK_DIR)
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            agent_cmd: default_agent_cmd(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationsSection {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: i64,
}

fn default_ttl_secs() -> i64 {
    3600
}

impl Default for ReservationsSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSection {
    /// Diff lines per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    40
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

/// Contents of `agentdesk.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeskToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub reservations: ReservationsSection,
    #[serde(default)]
    pub review: ReviewSection,
}

impl DeskToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse agentdesk.toml")
    }

    /// Load `<desk_dir>/agentdesk.toml`, or defaults if it does not exist.
    pub fn load_or_default(desk_dir: &Path) -> Result<Self> {
        let path = desk_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize agentdesk.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.project.base_branch.trim().is_empty() {
            warnings.push("project.base_branch is empty".to_string());
        }
        if self.project.id_prefix.is_empty()
            || !self.project.id_prefix.chars().all(|c| c.is_ascii_alphabetic())
        {
            warnings.push(format!(
                "Invalid id_prefix '{}': use ASCII letters only",
                self.project.id_prefix
            ));
        }
        if Path::new(&self.workspace.root)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            warnings.push(format!(
                "workspace.root '{}' contains '..'",
                self.workspace.root
            ));
        }
        if self.session.agent_cmd.trim().is_empty() {
            warnings.push("session.agent_cmd is empty".to_string());
        }
        if self.reservations.default_ttl_secs <= 0 {
            warnings.push(format!(
                "reservations.default_ttl_secs must be positive, got {}",
                self.reservations.default_ttl_secs
            ));
        } else if self.reservations.default_ttl_secs > MAX_TTL_SECS {
            warnings.push(format!(
                "reservations.default_ttl_secs {} exceeds {}; the maximum will be used",
                self.reservations.default_ttl_secs, MAX_TTL_SECS
            ));
        }
        if self.review.page_size == 0 {
            warnings.push("review.page_size is 0; one line per page will be used".to_string());
        }

        warnings
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub project_dir: PathBuf,
    pub desk_dir: PathBuf,
    pub toml: DeskToml,
    pub verbose: bool,
    cli_base_branch: Option<String>,
    cli_agent_cmd: Option<String>,
}

impl DeskConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let desk_dir = project_dir.join(DESK_DIR);
        let toml = DeskToml::load_or_default(&desk_dir)?;
        Ok(Self {
            project_dir,
            desk_dir,
            toml,
            verbose: false,
            cli_base_branch: None,
            cli_agent_cmd: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        base_branch: Option<String>,
        agent_cmd: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_base_branch = base_branch;
        config.cli_agent_cmd = agent_cmd;
        Ok(config)
    }

    /// Base branch (CLI → env → file).
    pub fn base_branch(&self) -> String {
        layered(
            self.cli_base_branch.as_deref(),
            ENV_BASE_BRANCH,
            &self.toml.project.base_branch,
        )
    }

    /// Agent command (CLI → env → file).
    pub fn agent_cmd(&self) -> String {
        layered(
            self.cli_agent_cmd.as_deref(),
            ENV_AGENT_CMD,
            &self.toml.session.agent_cmd,
        )
    }

    pub fn id_prefix(&self) -> &str {
        &self.toml.project.id_prefix
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.project_dir.join(&self.toml.workspace.root)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.project_dir.join(&self.toml.session.log_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.desk_dir.join(DB_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.desk_dir.join(CONFIG_FILE)
    }

    pub fn default_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.toml.reservations.default_ttl_secs.clamp(1, MAX_TTL_SECS))
    }

    pub fn page_size(&self) -> usize {
        self.toml.review.page_size.max(1)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

fn layered(cli: Option<&str>, env_key: &str, file: &str) -> String {
    if let Some(v) = cli.filter(|v| !v.trim().is_empty()) {
        return v.to_string();
    }
    match std::env::var(env_key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => file.to_string(),
    }
}

/// Write a default `agentdesk.toml` under `project_dir` unless one exists.
/// Returns the config path and whether it was created.
pub fn init_project(project_dir: &Path) -> Result<(PathBuf, bool)> {
    let desk_dir = project_dir.join(DESK_DIR);
    std::fs::create_dir_all(&desk_dir)
        .with_context(|| format!("Failed to create {}", desk_dir.display()))?;
    let path = desk_dir.join(CONFIG_FILE);
    if path.exists() {
        return Ok((path, false));
    }
    DeskToml::default().save(&path)?;
    Ok((path, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn empty_file_uses_defaults() {
        let toml = DeskToml::parse("").unwrap();
        assert_eq!(toml, DeskToml::default());
        assert_eq!(toml.project.base_branch, "main");
        assert_eq!(toml.project.id_prefix, "TASK");
        assert_eq!(toml.reservations.default_ttl_secs, 3600);
        assert_eq!(toml.review.page_size, 40);
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let toml = DeskToml::parse(
            r#"
[project]
base_branch = "develop"

[review]
page_size = 10
"#,
        )
        .unwrap();
        assert_eq!(toml.project.base_branch, "develop");
        assert_eq!(toml.project.id_prefix, "TASK");
        assert_eq!(toml.session.agent_cmd, "claude");
        assert_eq!(toml.review.page_size, 10);
    }

    #[test]
    fn validate_reports_bad_values() {
        let toml = DeskToml::parse(
            r#"
[project]
id_prefix = "T-1"

[workspace]
root = "../elsewhere"

[reservations]
default_ttl_secs = 0
"#,
        )
        .unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("id_prefix"));
    }

    #[test]
    fn oversized_default_ttl_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let desk_dir = dir.path().join(DESK_DIR);
        std::fs::create_dir_all(&desk_dir).unwrap();
        std::fs::write(
            desk_dir.join(CONFIG_FILE),
            "[reservations]\ndefault_ttl_secs = 9000000000000000000\n",
        )
        .unwrap();
        let config = DeskConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.default_ttl(), chrono::Duration::seconds(MAX_TTL_SECS));
        assert!(config.validate()[0].contains("exceeds"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        assert!(DeskToml::parse("[project\nbase_branch = ").is_err());
    }

    #[test]
    fn cli_beats_env_beats_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var(ENV_BASE_BRANCH).ok();

        unsafe { std::env::remove_var(ENV_BASE_BRANCH) };
        assert_eq!(layered(None, ENV_BASE_BRANCH, "main"), "main");

        unsafe { std::env::set_var(ENV_BASE_BRANCH, "trunk") };
        assert_eq!(layered(None, ENV_BASE_BRANCH, "main"), "trunk");
        assert_eq!(layered(Some("release"), ENV_BASE_BRANCH, "main"), "release");

        match saved {
            Some(v) => unsafe { std::env::set_var(ENV_BASE_BRANCH, v) },
            None => unsafe { std::env::remove_var(ENV_BASE_BRANCH) },
        }
    }

    #[test]
    fn init_writes_default_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let (path, created) = init_project(dir.path()).unwrap();
        assert!(created);
        assert_eq!(DeskToml::load(&path).unwrap(), DeskToml::default());

        let (_, created) = init_project(dir.path()).unwrap();
        assert!(!created);
    }

    #[test]
    fn paths_resolve_under_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let config = DeskConfig::new(dir.path().to_path_buf()).unwrap();
        assert!(config.workspaces_root().ends_with(".agentdesk/worktrees"));
        assert!(config.log_dir().ends_with(".agentdesk/logs"));
        assert!(config.db_path().ends_with(".agentdesk/agentdesk.db"));
        assert_eq!(config.default_ttl(), chrono::Duration::seconds(3600));
    }
}
