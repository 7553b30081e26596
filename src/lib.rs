//! autopr: autonomous issue-to-PR workers.
//!
//! The repo-level scheduler discovers labeled issues, gives each one an
//! isolated git worktree and a coding-agent session, and shepherds the
//! resulting PR through its review cycle. A single-PR mode watches one
//! PR's reviews in the main working copy.

pub mod agent;
pub mod config;
pub mod container;
pub mod errors;
pub mod github;
pub mod state;
pub mod util;
pub mod watch;
pub mod worktree;
