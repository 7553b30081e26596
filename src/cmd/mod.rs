//! Subcommand implementations wired up by `main`.

mod reply;
mod reviews;
mod watch;

pub use reply::cmd_reply;
pub use reviews::cmd_reviews;
pub use watch::{WatchParams, cmd_watch};

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use autopr::errors::EnvironmentError;
use autopr::github::{GitHubClient, WorkItemSource, detect_repo_slug, resolve_token};
use autopr::util::find_project_root;

/// Project root plus an authenticated GitHub client, the setup every
/// subcommand shares.
pub(crate) async fn client_for_cwd() -> Result<(PathBuf, GitHubClient)> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let Some(root) = find_project_root(&cwd) else {
        return Err(EnvironmentError::NotARepository { start: cwd }.into());
    };
    let Some(token) = resolve_token().await else {
        return Err(EnvironmentError::NoToken.into());
    };
    let slug = detect_repo_slug(&root)?;
    let client = GitHubClient::new(&slug, &token)?;
    Ok((root, client))
}

pub(crate) fn current_branch(project_root: &Path) -> Result<String> {
    let repo = git2::Repository::open(project_root).with_context(|| {
        format!(
            "Failed to open git repository at {}",
            project_root.display()
        )
    })?;
    let head = repo.head().context("Failed to read HEAD")?;
    head.shorthand()
        .map(str::to_string)
        .context("HEAD is not on a branch")
}

/// PR number from the argument, or the open PR for the current branch.
pub(crate) async fn resolve_pr(
    client: &GitHubClient,
    project_root: &Path,
    pr: Option<u64>,
) -> Result<u64> {
    if let Some(pr) = pr {
        return Ok(pr);
    }
    let branch = current_branch(project_root)?;
    match client.find_pr_for_branch(&branch).await? {
        Some(pr) => Ok(pr),
        None => bail!("no open PR found for current branch '{branch}'"),
    }
}
