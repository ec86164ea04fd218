//! agentdesk: task orchestration for autonomous coding agents.
//!
//! Each task gets an isolated git worktree and a tmux-hosted worker session.
//! Agents coordinate through advisory file reservations and a mailbox, and
//! finished work goes through a review queue before it is merged.
//!
//! The [`orchestrator::Orchestrator`] is the entry point; everything it touches
//! outside the process goes through [`process::CommandRunner`].

pub mod config;
pub mod errors;
pub mod git;
pub mod mailbox;
pub mod orchestrator;
pub mod process;
pub mod reservations;
pub mod review;
pub mod session;
pub mod shell;
pub mod store;
pub mod workspace;

pub use agentdesk_common as common;
pub use errors::{DeskError, ErrorKind, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
