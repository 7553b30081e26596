//! Per-issue worker: Phase 1 implements the issue and opens a PR,
//! Phase 2 watches that PR's reviews and feeds new activity back to the
//! agent until the PR leaves the open state.
//!
//! One worker owns exactly one issue number for its whole life. Every
//! abort path writes a durable `failed` record before returning so the
//! scheduler's reap step always makes progress.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentBackend, ContainerAgent};
use crate::container::ContainerManager;
use crate::errors::WorkerError;
use crate::github::{WorkItemSource, latest_activity_timestamp};
use crate::state::{IssueRecord, IssueStatus, PrRecord, StateDir};
use crate::watch::{EPOCH_TS, prompts};
use crate::worktree::{WorktreeProvider, branch_for_issue, worktree_name_for_issue};

/// Container isolation settings shared by all workers of one run.
#[derive(Clone)]
pub struct ContainerSpec {
    pub manager: Arc<ContainerManager>,
    pub env: Vec<(String, String)>,
}

/// Everything one worker needs, handed over by the scheduler.
pub struct WorkerContext {
    pub issue: u64,
    pub interval: Duration,
    pub once: bool,
    pub base_branch: String,
    pub state: StateDir,
    pub source: Arc<dyn WorkItemSource>,
    pub backend: Arc<dyn AgentBackend>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub container: Option<ContainerSpec>,
    pub cancel: CancellationToken,
}

/// Timestamped operator log for one worker, mirrored to tracing and the
/// issue's durable log file.
pub(crate) struct WorkerLog {
    issue: u64,
    path: PathBuf,
}

impl WorkerLog {
    pub(crate) fn new(issue: u64, path: PathBuf) -> Self {
        Self { issue, path }
    }

    fn append(&self, msg: &str) {
        let line = format!(
            "[{}] [worker #{}] {msg}\n",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            self.issue
        );
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            let _ = f.write_all(line.as_bytes());
        }
    }

    pub(crate) fn say(&self, msg: &str) {
        info!("[worker #{}] {msg}", self.issue);
        self.append(msg);
    }

    pub(crate) fn warn(&self, msg: &str) {
        warn!("[worker #{}] {msg}", self.issue);
        self.append(msg);
    }
}

pub async fn run_worker(ctx: WorkerContext) -> Result<(), WorkerError> {
    let log = WorkerLog::new(ctx.issue, ctx.state.log_path(ctx.issue));

    // Container isolation brackets both phases so the continued session
    // in Phase 2 runs in the same environment as Phase 1.
    let container_name = match &ctx.container {
        Some(spec) => {
            let name = ContainerManager::container_name(&worktree_name_for_issue(ctx.issue));
            log.say(&format!("starting container {name}"));
            if let Err(e) = spec.manager.start(&name, &spec.env).await {
                mark_failed(&ctx, &log, "container start failed");
                return Err(WorkerError::Other(e));
            }
            Some(name)
        }
        None => None,
    };
    let backend: Arc<dyn AgentBackend> = match (&ctx.container, &container_name) {
        (Some(spec), Some(name)) => Arc::new(ContainerAgent::new(spec.manager.clone(), name)),
        _ => ctx.backend.clone(),
    };

    let result = run_phases(&ctx, backend.as_ref(), &log).await;

    if let (Some(spec), Some(name)) = (&ctx.container, &container_name) {
        spec.manager.stop(name).await;
    }
    result
}

/// Write a durable `failed` record, preserving branch and PR number from
/// any earlier record.
fn mark_failed(ctx: &WorkerContext, log: &WorkerLog, reason: &str) {
    let mut record = ctx
        .state
        .read_issue(ctx.issue)
        .unwrap_or_else(|| IssueRecord::new(IssueStatus::Failed, branch_for_issue(ctx.issue)));
    record.status = IssueStatus::Failed;
    if let Err(e) = ctx.state.write_issue(ctx.issue, &record) {
        log.warn(&format!("could not persist failed status: {e:#}"));
    }
    log.warn(&format!("issue marked failed: {reason}"));
}

async fn run_phases(
    ctx: &WorkerContext,
    backend: &dyn AgentBackend,
    log: &WorkerLog,
) -> Result<(), WorkerError> {
    let issue = ctx.issue;
    let branch = branch_for_issue(issue);
    let agent_log = ctx.state.log_path(issue);

    // Phase 1: implement and open a PR.
    log.say(&format!("creating worktree on branch {branch}"));
    let dir = match ctx.worktrees.create_for_issue(issue, &ctx.base_branch).await {
        Ok(dir) => dir,
        Err(source) => {
            mark_failed(ctx, log, "worktree creation failed");
            return Err(WorkerError::Worktree { issue, source });
        }
    };

    let detail = match ctx.source.get_issue(issue).await {
        Ok(detail) => detail,
        Err(source) => {
            mark_failed(ctx, log, "issue fetch failed");
            return Err(WorkerError::IssueFetch { issue, source });
        }
    };

    log.say(&format!("implementing \"{}\"", detail.title));
    let prompt = prompts::build_implement_prompt(&detail, &branch, &ctx.base_branch);
    match backend.run(&dir, &prompt, Some(&agent_log)).await {
        Ok(true) => {}
        Ok(false) => {
            mark_failed(ctx, log, "agent exited non-zero during implementation");
            return Err(WorkerError::Implementation { issue });
        }
        Err(e) => {
            mark_failed(ctx, log, &format!("agent could not be run: {e:#}"));
            return Err(WorkerError::Implementation { issue });
        }
    }

    let pr = match ctx.source.find_pr_for_branch(&branch).await {
        Ok(Some(pr)) => pr,
        Ok(None) => {
            mark_failed(ctx, log, "no open PR found for the branch");
            return Err(WorkerError::NoPullRequest { issue, branch });
        }
        Err(e) => {
            mark_failed(ctx, log, "PR detection failed");
            return Err(WorkerError::Other(e));
        }
    };
    log.say(&format!("PR #{pr} detected for branch {branch}"));

    if ctx.cancel.is_cancelled() {
        mark_failed(ctx, log, "cancelled");
        return Err(WorkerError::Cancelled { issue });
    }
    ctx.state
        .write_issue(
            issue,
            &IssueRecord::new(IssueStatus::Watching, branch.as_str()).with_pr(pr),
        )
        .map_err(WorkerError::Other)?;

    // Phase 2: watch reviews until the PR leaves the open state.
    watch_reviews(ctx, backend, log, &dir, pr, &branch).await?;

    ctx.state
        .write_issue(
            issue,
            &IssueRecord::new(IssueStatus::Done, branch.as_str()).with_pr(pr),
        )
        .map_err(WorkerError::Other)?;
    log.say("done");
    Ok(())
}

async fn watch_reviews(
    ctx: &WorkerContext,
    backend: &dyn AgentBackend,
    log: &WorkerLog,
    dir: &Path,
    pr: u64,
    branch: &str,
) -> Result<(), WorkerError> {
    let agent_log = ctx.state.log_path(ctx.issue);

    let mut baseline = match ctx.state.read_pr(pr) {
        Some(record) => record.last_comment_ts,
        None => match ctx.source.latest_activity_ts(pr).await {
            Ok(Some(ts)) => ts,
            Ok(None) => EPOCH_TS.to_string(),
            Err(e) => {
                log.warn(&format!("could not snapshot current PR activity: {e:#}"));
                EPOCH_TS.to_string()
            }
        },
    };
    persist_baseline(ctx, log, pr, branch, &baseline);
    log.say(&format!(
        "watching PR #{pr} for review activity (baseline {baseline})"
    ));

    loop {
        if !ctx.once {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    mark_failed(ctx, log, "cancelled during review watch");
                    return Err(WorkerError::Cancelled { issue: ctx.issue });
                }
                _ = tokio::time::sleep(ctx.interval) => {}
            }
        }

        match ctx.source.pr_state(pr).await {
            Ok(state) if !state.is_open() => {
                log.say(&format!("PR #{pr} is {state}, review watch finished"));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log.warn(&format!("could not fetch PR #{pr} state: {e:#}"));
                if ctx.once {
                    break;
                }
                continue;
            }
        }

        match ctx.source.new_activity_since(pr, &baseline).await {
            Ok(None) => log.say("no new review activity"),
            Ok(Some(activity)) => {
                log.say(&format!(
                    "{} new inline comments, {} new reviews",
                    activity.inline_comments.len(),
                    activity.top_level_reviews.len()
                ));
                let prompt = prompts::build_review_prompt(pr, &activity);
                match backend.run_continued(dir, &prompt, Some(&agent_log)).await {
                    Ok(true) => log.say("agent addressed the new review activity"),
                    // Baseline still advances below: the same activity is
                    // never replayed, so these comments may go unaddressed.
                    Ok(false) => log.warn(
                        "agent exited non-zero on review activity; \
                         advancing baseline past possibly unaddressed comments",
                    ),
                    Err(e) => log.warn(&format!(
                        "agent could not be run on review activity ({e:#}); \
                         advancing baseline past possibly unaddressed comments"
                    )),
                }
                if let Some(latest) = latest_activity_timestamp(
                    &activity.inline_comments,
                    &activity.top_level_reviews,
                ) && latest > baseline
                {
                    baseline = latest;
                    persist_baseline(ctx, log, pr, branch, &baseline);
                }
            }
            Err(e) => log.warn(&format!("could not fetch review activity: {e:#}")),
        }

        if ctx.once {
            break;
        }
    }
    Ok(())
}

fn persist_baseline(ctx: &WorkerContext, log: &WorkerLog, pr: u64, branch: &str, baseline: &str) {
    let record = PrRecord {
        last_comment_ts: baseline.to_string(),
        branch: branch.to_string(),
    };
    if let Err(e) = ctx.state.write_pr(pr, &record) {
        log.warn(&format!("could not persist baseline for PR #{pr}: {e:#}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::test_support::{MemoryWorktrees, RecordingBackend, ScriptedSource};

    fn context(
        source: Arc<ScriptedSource>,
        backend: Arc<RecordingBackend>,
        worktrees: Arc<MemoryWorktrees>,
        state: StateDir,
    ) -> WorkerContext {
        WorkerContext {
            issue: 42,
            interval: Duration::from_millis(5),
            once: true,
            base_branch: "main".to_string(),
            state,
            source,
            backend,
            worktrees,
            container: None,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_implements_then_watches_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "The word 'recieve' appears in file.go");
        source.set_pr_for_branch("auto/issue-42", 99);
        source.push_pr_state(99, crate::github::PrState::Open);
        source.push_activity(
            99,
            Some(ScriptedSource::inline_comment(
                555,
                "file.go",
                10,
                "Typo here too",
                "2024-03-01T10:00:30Z",
            )),
        );

        let backend = Arc::new(RecordingBackend::new());
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend.clone(), worktrees, state.clone());

        run_worker(ctx).await.unwrap();

        let record = state.read_issue(42).unwrap();
        assert_eq!(record.status, IssueStatus::Done);
        assert_eq!(record.branch, "auto/issue-42");
        assert_eq!(record.pr_number, Some(99));

        // Baseline landed on the comment's updated_at.
        let pr = state.read_pr(99).unwrap();
        assert_eq!(pr.last_comment_ts, "2024-03-01T10:00:30Z");
        assert_eq!(pr.branch, "auto/issue-42");

        let runs = backend.runs();
        assert_eq!(runs.len(), 2);
        // Implement prompt: fresh session with issue metadata.
        assert!(!runs[0].continued);
        assert!(runs[0].prompt.contains("issue #42"));
        assert!(runs[0].prompt.contains("Fix typo"));
        assert!(runs[0].prompt.contains("auto/issue-42"));
        // Review prompt: continued session with the comment verbatim.
        assert!(runs[1].continued);
        assert!(runs[1].prompt.contains("\"id\": 555"));
        assert!(runs[1].prompt.contains("file.go"));
        assert!(runs[1].prompt.contains("\"line\": 10"));
        assert!(runs[1].prompt.contains("Typo here too"));
    }

    #[tokio::test]
    async fn fresh_watch_snapshots_existing_activity_as_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "");
        source.set_pr_for_branch("auto/issue-42", 99);
        // Comments that predate the watch must not be replayed: the
        // baseline starts at the newest existing activity.
        source.set_latest_ts(99, "2024-04-01T08:00:00Z");
        source.push_pr_state(99, crate::github::PrState::Open);
        source.push_activity(99, None);

        let backend = Arc::new(RecordingBackend::new());
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend.clone(), worktrees, state.clone());

        run_worker(ctx).await.unwrap();
        assert_eq!(
            state.read_pr(99).unwrap().last_comment_ts,
            "2024-04-01T08:00:00Z"
        );
        // Only the implement session ran.
        assert_eq!(backend.runs().len(), 1);
    }

    #[tokio::test]
    async fn missing_pr_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "");
        // No PR mapping for the branch.

        let backend = Arc::new(RecordingBackend::new());
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend, worktrees, state.clone());

        let err = run_worker(ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::NoPullRequest { issue: 42, .. }));
        assert_eq!(state.read_issue(42).unwrap().status, IssueStatus::Failed);
    }

    #[tokio::test]
    async fn agent_failure_in_phase_one_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "");
        source.set_pr_for_branch("auto/issue-42", 99);

        let backend = Arc::new(RecordingBackend::new());
        backend.push_result(Ok(false));
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend, worktrees, state.clone());

        let err = run_worker(ctx).await.unwrap_err();
        assert!(matches!(err, WorkerError::Implementation { issue: 42 }));
        assert_eq!(state.read_issue(42).unwrap().status, IssueStatus::Failed);
    }

    #[tokio::test]
    async fn baseline_advances_even_when_review_agent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "");
        source.set_pr_for_branch("auto/issue-42", 99);
        source.push_pr_state(99, crate::github::PrState::Open);
        source.push_activity(
            99,
            Some(ScriptedSource::inline_comment(
                1,
                "file.go",
                3,
                "still wrong",
                "2024-03-02T09:00:00Z",
            )),
        );

        let backend = Arc::new(RecordingBackend::new());
        backend.push_result(Ok(true)); // implement succeeds
        backend.push_result(Ok(false)); // review session fails
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend, worktrees, state.clone());

        run_worker(ctx).await.unwrap();
        assert_eq!(
            state.read_pr(99).unwrap().last_comment_ts,
            "2024-03-02T09:00:00Z"
        );
        assert_eq!(state.read_issue(42).unwrap().status, IssueStatus::Done);
    }

    #[tokio::test]
    async fn closed_pr_ends_the_watch_without_an_agent_run() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let source = Arc::new(ScriptedSource::new());
        source.set_issue(42, "Fix typo", "");
        source.set_pr_for_branch("auto/issue-42", 99);
        source.push_pr_state(99, crate::github::PrState::Merged);

        let backend = Arc::new(RecordingBackend::new());
        let worktrees = Arc::new(MemoryWorktrees::new());
        let ctx = context(source, backend.clone(), worktrees, state.clone());

        run_worker(ctx).await.unwrap();
        assert_eq!(state.read_issue(42).unwrap().status, IssueStatus::Done);
        // Only the implement session ran.
        assert_eq!(backend.runs().len(), 1);
    }

    #[tokio::test]
    async fn worker_log_lines_reach_the_issue_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        state.init().unwrap();

        let log = WorkerLog::new(7, state.log_path(7));
        log.say("creating worktree on branch auto/issue-7");
        log.warn("something transient");

        let contents = std::fs::read_to_string(state.log_path(7)).unwrap();
        assert!(contents.contains("[worker #7] creating worktree"));
        assert!(contents.contains("something transient"));
    }
}
