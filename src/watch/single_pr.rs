//! Single-PR watch mode: poll one PR for new review activity and hand
//! it to the agent in the project root. Unlike the repo-mode worker this
//! starts fresh agent sessions, because the PR branch is assumed to be
//! checked out in the main working copy rather than a dedicated
//! worktree.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentBackend;
use crate::github::{NewActivity, WorkItemSource, latest_activity_timestamp};
use crate::state::{PrRecord, StateDir};
use crate::util::first_line;
use crate::watch::{EPOCH_TS, prompts};

pub struct SinglePrOptions {
    pub pr: u64,
    pub branch: String,
    pub interval: Duration,
    pub once: bool,
    pub project_root: PathBuf,
    pub state: StateDir,
    pub source: Arc<dyn WorkItemSource>,
    pub backend: Arc<dyn AgentBackend>,
    pub cancel: CancellationToken,
}

pub async fn watch_single_pr(opts: SinglePrOptions) -> Result<()> {
    let pr = opts.pr;
    let mut baseline = match opts.state.read_pr(pr) {
        Some(record) => {
            info!("resuming PR #{pr} watch from {}", record.last_comment_ts);
            record.last_comment_ts
        }
        None => opts
            .source
            .latest_activity_ts(pr)
            .await
            .context("Failed to snapshot current PR activity")?
            .unwrap_or_else(|| EPOCH_TS.to_string()),
    };
    persist_baseline(&opts, &baseline);
    info!(
        "watching PR #{pr} on branch {} (baseline {baseline}, every {}s)",
        opts.branch,
        opts.interval.as_secs()
    );

    loop {
        match opts.source.pr_state(pr).await {
            Ok(state) if !state.is_open() => {
                info!("PR #{pr} is {state}, stopping");
                break;
            }
            Ok(_) => match opts.source.new_activity_since(pr, &baseline).await {
                Ok(Some(activity)) => {
                    info!(
                        "{} new inline comments, {} new reviews on PR #{pr}",
                        activity.inline_comments.len(),
                        activity.top_level_reviews.len()
                    );
                    preview(&activity);

                    let prompt = prompts::build_single_pr_prompt(pr, &opts.branch, &activity);
                    match opts.backend.run(&opts.project_root, &prompt, None).await {
                        Ok(true) => info!("agent addressed the new review activity"),
                        Ok(false) => warn!(
                            "agent exited non-zero on review activity; \
                             advancing baseline past possibly unaddressed comments"
                        ),
                        Err(e) => warn!(
                            "agent could not be run on review activity ({e:#}); \
                             advancing baseline past possibly unaddressed comments"
                        ),
                    }

                    if let Some(latest) = latest_activity_timestamp(
                        &activity.inline_comments,
                        &activity.top_level_reviews,
                    ) && latest > baseline
                    {
                        baseline = latest;
                        persist_baseline(&opts, &baseline);
                    }
                }
                Ok(None) => info!("no new activity on PR #{pr}"),
                Err(e) => warn!("could not fetch review activity for PR #{pr}: {e:#}"),
            },
            Err(e) => warn!("could not fetch PR #{pr} state: {e:#}"),
        }

        if opts.once {
            break;
        }
        tokio::select! {
            _ = opts.cancel.cancelled() => {
                info!("shutdown requested, stopping PR #{pr} watch");
                break;
            }
            _ = tokio::time::sleep(opts.interval) => {}
        }
    }
    Ok(())
}

fn persist_baseline(opts: &SinglePrOptions, baseline: &str) {
    let record = PrRecord {
        last_comment_ts: baseline.to_string(),
        branch: opts.branch.clone(),
    };
    if let Err(e) = opts.state.write_pr(opts.pr, &record) {
        warn!("could not persist baseline for PR #{}: {e:#}", opts.pr);
    }
}

fn preview(activity: &NewActivity) {
    for comment in &activity.inline_comments {
        info!(
            "  [{}] {}:{} {}",
            comment.user.login,
            comment.path,
            comment.line_display(),
            first_line(&comment.body)
        );
    }
    for review in &activity.top_level_reviews {
        info!(
            "  [{}] review ({}): {}",
            review.user.login,
            review.state,
            first_line(&review.body)
        );
    }
}
