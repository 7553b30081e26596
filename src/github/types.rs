//! GitHub REST payload subsets and pure helpers over them.
//!
//! All timestamps are ISO-8601 UTC strings and are compared
//! lexicographically, which orders them chronologically.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub login: String,
}

/// An inline (line-level) PR review comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: u64,
    pub path: String,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub original_line: Option<u64>,
    pub body: String,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub pull_request_review_id: Option<u64>,
}

impl ReviewComment {
    /// Best available line number, for display.
    pub fn line_display(&self) -> String {
        self.line
            .or(self.original_line)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Most recent timestamp on this comment.
    pub fn latest_timestamp(&self) -> &str {
        if self.updated_at.is_empty() {
            &self.created_at
        } else {
            &self.updated_at
        }
    }
}

/// A top-level PR review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub user: User,
    #[serde(default)]
    pub submitted_at: String,
}

/// A GitHub issue. PRs also surface through the issues endpoint and are
/// marked by the `pull_request` key.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl Issue {
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub head: PrHead,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrHead {
    #[serde(rename = "ref", default)]
    pub branch: String,
}

/// Coarse PR lifecycle state. `Merged` wins over `Closed` — the REST API
/// reports merged PRs as closed with a separate `merged` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

impl PrState {
    pub fn from_payload(pr: &PullRequest) -> Self {
        if pr.merged {
            PrState::Merged
        } else if pr.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        }
    }

    pub fn is_open(self) -> bool {
        self == PrState::Open
    }
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
            PrState::Merged => "merged",
        })
    }
}

/// Response from posting a reply to an inline comment.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyResponse {
    pub id: u64,
    #[serde(default)]
    pub user: User,
}

/// New review activity on a PR since a baseline timestamp. This struct is
/// serialized verbatim into the review-handling prompt, so field names
/// are part of the agent-facing contract.
#[derive(Debug, Clone, Serialize)]
pub struct NewActivity {
    pub inline_comments: Vec<ReviewComment>,
    pub top_level_reviews: Vec<Review>,
}

impl NewActivity {
    pub fn is_empty(&self) -> bool {
        self.inline_comments.is_empty() && self.top_level_reviews.is_empty()
    }
}

/// Flatten per-label query results into one list, dropping pull requests
/// and deduplicating by issue number (first sighting wins).
pub fn dedup_issues(batches: Vec<Vec<Issue>>) -> Vec<Issue> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for batch in batches {
        for issue in batch {
            if issue.is_pull_request() || !seen.insert(issue.number) {
                continue;
            }
            out.push(issue);
        }
    }
    out
}

/// Maximum activity timestamp across inline comments and reviews, if any.
pub fn latest_activity_timestamp(comments: &[ReviewComment], reviews: &[Review]) -> Option<String> {
    let mut max: Option<&str> = None;
    for c in comments {
        let ts = c.latest_timestamp();
        if !ts.is_empty() && max.is_none_or(|m| ts > m) {
            max = Some(ts);
        }
    }
    for r in reviews {
        if !r.submitted_at.is_empty() && max.is_none_or(|m| r.submitted_at.as_str() > m) {
            max = Some(&r.submitted_at);
        }
    }
    max.map(str::to_string)
}

/// Activity strictly newer than `since`. Top-level reviews only count when
/// they carry a non-empty body (bare COMMENTED shells around inline
/// comments are noise). Returns None when nothing is new.
pub fn activity_since(
    comments: &[ReviewComment],
    reviews: &[Review],
    since: &str,
) -> Option<NewActivity> {
    let inline_comments: Vec<ReviewComment> = comments
        .iter()
        .filter(|c| c.latest_timestamp() > since)
        .cloned()
        .collect();
    let top_level_reviews: Vec<Review> = reviews
        .iter()
        .filter(|r| r.submitted_at.as_str() > since && !r.body.is_empty())
        .cloned()
        .collect();

    let activity = NewActivity {
        inline_comments,
        top_level_reviews,
    };
    if activity.is_empty() { None } else { Some(activity) }
}

/// Keep only the latest review round: the review with the highest id and
/// the inline comments attached to it.
pub fn filter_latest_review(
    reviews: Vec<Review>,
    comments: Vec<ReviewComment>,
) -> (Vec<Review>, Vec<ReviewComment>) {
    let Some(max_id) = reviews.iter().map(|r| r.id).max() else {
        return (reviews, comments);
    };
    let reviews = reviews.into_iter().filter(|r| r.id == max_id).collect();
    let comments = comments
        .into_iter()
        .filter(|c| c.pull_request_review_id == Some(max_id))
        .collect();
    (reviews, comments)
}
