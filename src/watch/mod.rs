//! Watch modes: the repo-level scheduler, the per-issue worker it
//! spawns, and the standalone single-PR watcher.

pub mod prompts;
pub mod repo;
pub mod single_pr;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

/// Baseline sentinel used when a PR has no review activity yet. Sorts
/// before every real ISO-8601 timestamp.
pub const EPOCH_TS: &str = "1970-01-01T00:00:00Z";
