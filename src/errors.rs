//! Typed error hierarchy for autopr.
//!
//! Two top-level enums cover the two failure domains:
//! - `EnvironmentError` — startup prerequisites; fatal, reflected in the
//!   process exit code before any scheduling begins
//! - `WorkerError` — failures inside one issue's lifecycle; recorded as a
//!   durable `failed` status, never in the process exit code

use std::path::PathBuf;
use thiserror::Error;

/// Errors detected during startup environment checks.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{tool} not found in PATH. {hint}")]
    ToolNotFound {
        tool: &'static str,
        hint: &'static str,
    },

    #[error("no GitHub token available. Set GH_TOKEN or run 'gh auth login'")]
    NoToken,

    #[error("not inside a git repository (searched upward from {start})")]
    NotARepository { start: PathBuf },
}

/// Errors from a single issue worker's lifecycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worktree for issue #{issue} could not be created: {source}")]
    Worktree {
        issue: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to fetch issue #{issue}: {source}")]
    IssueFetch {
        issue: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("agent exited with an error while implementing issue #{issue}")]
    Implementation { issue: u64 },

    #[error("no open PR found for branch '{branch}' after implementing issue #{issue}")]
    NoPullRequest { issue: u64, branch: String },

    #[error("worker for issue #{issue} was cancelled")]
    Cancelled { issue: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
