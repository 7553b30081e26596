//! Prompt construction for agent sessions.
//!
//! The prompts are the entire interface to the coding agent: issue
//! metadata in, commits and PR interactions out. Scope constraints are
//! repeated in every prompt because the agent has no other memory of
//! them across sessions.

use crate::github::{Issue, NewActivity};

const SCOPE_CONSTRAINTS: &str = "\
Editing scope constraints:
- Only modify files directly relevant to this task.
- Do NOT touch CLAUDE.md, .claude/, scripts/, .gitignore, CI workflow files, \
or any other repository configuration.
- Do not reformat or refactor code unrelated to this task.";

/// Phase 1 prompt: implement the issue, commit, push, open a PR.
pub fn build_implement_prompt(issue: &Issue, branch: &str, base_branch: &str) -> String {
    let body = issue
        .body
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or("(no description provided)");
    format!(
        "You are working on issue #{number}: {title}\n\
         \n\
         {body}\n\
         \n\
         You are on branch {branch}, checked out in the current working \
         directory.\n\
         \n\
         Implement the changes this issue asks for. When you are done:\n\
         1. Commit your work with a clear message referencing issue #{number}.\n\
         2. Push the branch to origin.\n\
         3. Open a pull request against {base_branch} with `gh pr create`, \
         titled after the issue, with \"Closes #{number}\" in the description.\n\
         \n\
         {SCOPE_CONSTRAINTS}",
        number = issue.number,
        title = issue.title,
    )
}

/// Phase 2 prompt: address new review activity on the issue's PR. The
/// session is continued, so the agent already has the implementation
/// context for this worktree.
pub fn build_review_prompt(pr: u64, activity: &NewActivity) -> String {
    format!(
        "New review activity arrived on PR #{pr}. Here it is as JSON:\n\
         \n\
         {json}\n\
         \n\
         Address every point in the current working directory (the PR \
         branch is already checked out):\n\
         1. For each inline comment, make the change it asks for, or leave \
         it and explain why in your reply.\n\
         2. Commit and push your changes to the PR branch.\n\
         3. After addressing each inline comment, reply to it with \
         `autopr reply <comment_id> \"<short summary of what you did>\"`.\n\
         \n\
         {SCOPE_CONSTRAINTS}",
        json = activity_json(activity),
    )
}

/// Single-PR mode prompt. Fresh session in the project root, so the PR
/// context has to be spelled out.
pub fn build_single_pr_prompt(pr: u64, branch: &str, activity: &NewActivity) -> String {
    format!(
        "You are addressing review feedback on PR #{pr} (branch {branch}), \
         which is checked out in the current working directory. New review \
         activity as JSON:\n\
         \n\
         {json}\n\
         \n\
         For each inline comment, make the change it asks for, commit and \
         push to {branch}, then reply to the comment with \
         `autopr reply <comment_id> \"<short summary of what you did>\"`.\n\
         \n\
         {SCOPE_CONSTRAINTS}",
        json = activity_json(activity),
    )
}

fn activity_json(activity: &NewActivity) -> String {
    serde_json::to_string_pretty(activity)
        .unwrap_or_else(|_| "(activity could not be serialized)".to_string())
}
