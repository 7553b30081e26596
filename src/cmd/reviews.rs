//! `autopr reviews` — print review activity for a PR.

use anyhow::Result;
use console::style;

use autopr::github::{WorkItemSource, filter_latest_review};

use super::{client_for_cwd, resolve_pr};

pub async fn cmd_reviews(pr: Option<u64>, latest: bool, json: bool) -> Result<()> {
    let (root, client) = client_for_cwd().await?;
    let pr = resolve_pr(&client, &root, pr).await?;

    let comments = client.review_comments(pr).await?;
    let reviews = client.reviews(pr).await?;
    let (reviews, comments) = if latest {
        filter_latest_review(reviews, comments)
    } else {
        (reviews, comments)
    };

    if json {
        let payload = serde_json::json!({
            "pr": pr,
            "reviews": reviews,
            "comments": comments,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    if reviews.is_empty() && comments.is_empty() {
        println!("No review activity on PR #{pr}.");
        return Ok(());
    }

    println!("{}", style(format!("Review activity on PR #{pr}")).bold());
    for review in &reviews {
        println!(
            "\n{} {} {}",
            style(&review.user.login).bold(),
            style(format!("({})", review.state)).yellow(),
            style(&review.submitted_at).dim()
        );
        if !review.body.is_empty() {
            println!("{}", review.body);
        }
    }
    for comment in &comments {
        println!(
            "\n{} {}",
            style(format!("{}:{}", comment.path, comment.line_display())).cyan(),
            style(format!("[{}] id {}", comment.user.login, comment.id)).dim()
        );
        println!("{}", comment.body);
    }
    Ok(())
}
