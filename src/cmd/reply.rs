//! `autopr reply` — answer an inline review comment by id. The review
//! prompt tells the agent to use this after addressing each comment.

use anyhow::{Context, Result};
use console::style;

use autopr::github::WorkItemSource;
use autopr::util::first_line;

use super::{client_for_cwd, resolve_pr};

pub async fn cmd_reply(
    comment_id: Option<u64>,
    body: Option<String>,
    list: bool,
    pr: Option<u64>,
) -> Result<()> {
    let (root, client) = client_for_cwd().await?;
    let pr = resolve_pr(&client, &root, pr).await?;

    if list {
        let comments = client.review_comments(pr).await?;
        if comments.is_empty() {
            println!("No inline comments on PR #{pr}.");
            return Ok(());
        }
        for comment in comments {
            println!(
                "{} {} {}",
                style(comment.id).bold(),
                style(format!("{}:{}", comment.path, comment.line_display())).cyan(),
                first_line(&comment.body)
            );
        }
        return Ok(());
    }

    let comment_id = comment_id.context("a comment id is required (see 'reply --list')")?;
    let body = body.context("a reply body is required")?;
    let reply = client.reply_to_comment(pr, comment_id, &body).await?;
    println!(
        "Replied to comment {comment_id} as {} (reply id {})",
        reply.user.login, reply.id
    );
    Ok(())
}
