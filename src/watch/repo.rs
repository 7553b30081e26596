//! Repo-level scheduler: discovers labeled issues, admits them under a
//! concurrency bound, and spawns one worker per issue.
//!
//! Each cycle: reap finished workers, clean up stale worktrees, discover
//! and admit new issues, then sleep (or drain and exit in single-pass
//! mode). The in-memory active map is the sole source of truth for
//! "a worker is running for issue N"; the durable record can lag behind
//! it after a crash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::AgentBackend;
use crate::github::WorkItemSource;
use crate::state::{IssueRecord, IssueStatus, StateDir};
use crate::watch::worker::{ContainerSpec, WorkerContext, run_worker};
use crate::worktree::{
    WorktreeProvider, branch_for_issue, issue_number_from_name, pr_number_from_name,
};

pub struct RepoOptions {
    pub interval: Duration,
    pub once: bool,
    pub max_concurrent: usize,
    pub issue_labels: Vec<String>,
    pub base_branch: String,
    pub state: StateDir,
    pub source: Arc<dyn WorkItemSource>,
    pub backend: Arc<dyn AgentBackend>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub container: Option<ContainerSpec>,
}

pub struct RepoWatcher {
    opts: RepoOptions,
    semaphore: Arc<Semaphore>,
    active: Arc<Mutex<HashMap<u64, CancellationToken>>>,
    tasks: JoinSet<()>,
}

impl RepoWatcher {
    pub fn new(opts: RepoOptions) -> Self {
        let semaphore = Arc::new(Semaphore::new(opts.max_concurrent.max(1)));
        Self {
            opts,
            semaphore,
            active: Arc::new(Mutex::new(HashMap::new())),
            tasks: JoinSet::new(),
        }
    }

    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "repo watch started (labels: {}, max {} concurrent workers)",
            self.opts.issue_labels.join(","),
            self.opts.max_concurrent
        );
        loop {
            self.reap().await;
            if let Err(e) = self.cleanup_stale_worktrees().await {
                warn!("worktree cleanup failed: {e:#}");
            }
            if let Err(e) = self.discover().await {
                warn!("issue discovery failed, skipping this cycle: {e:#}");
            }
            if !self.opts.state.is_initialized() {
                self.opts.state.mark_initialized()?;
                info!("first scan complete, existing issues snapshotted as preexisting");
            }
            info!("{} active workers", self.active.lock().await.len());

            if self.opts.once {
                self.drain().await;
                self.reap().await;
                return Ok(());
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutting down, cancelling active workers");
                    self.shutdown().await;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.opts.interval) => {}
            }
        }
    }

    /// Drop finished workers out of the active map so their issues no
    /// longer block cleanup. Workers also deregister themselves on exit;
    /// this pass additionally catches any whose durable record says they
    /// are finished.
    pub(crate) async fn reap(&mut self) {
        while self.tasks.try_join_next().is_some() {}

        let snapshot: Vec<(u64, CancellationToken)> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(n, t)| (*n, t.clone()))
            .collect();
        for (issue, token) in snapshot {
            if let Some(record) = self.opts.state.read_issue(issue)
                && record.status.is_finished()
            {
                token.cancel();
                self.active.lock().await.remove(&issue);
                info!("reaped worker for issue #{issue} ({})", record.status);
            }
        }
    }

    /// Remove worktrees whose upstream work item is finished, never
    /// touching a worktree while its worker is in the active map.
    pub(crate) async fn cleanup_stale_worktrees(&self) -> Result<()> {
        for name in self.opts.worktrees.list()? {
            if let Some(issue) = issue_number_from_name(&name) {
                if self.active.lock().await.contains_key(&issue) {
                    continue;
                }
                match self.opts.source.get_issue(issue).await {
                    Ok(detail) if detail.state != "open" => {
                        info!("issue #{issue} is closed, removing worktree {name}");
                        if let Err(e) = self.opts.worktrees.remove(&name).await {
                            warn!("could not remove worktree {name}: {e:#}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("could not check issue #{issue} for cleanup: {e:#}"),
                }
            } else if let Some(pr) = pr_number_from_name(&name) {
                match self.opts.source.pr_state(pr).await {
                    Ok(state) if !state.is_open() => {
                        info!("PR #{pr} is {state}, removing worktree {name}");
                        if let Err(e) = self.opts.worktrees.remove(&name).await {
                            warn!("could not remove worktree {name}: {e:#}");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!("could not check PR #{pr} for cleanup: {e:#}"),
                }
            }
        }
        Ok(())
    }

    /// Find labeled issues with no record yet and admit them under the
    /// concurrency bound. A full pool defers an issue to a later cycle.
    pub(crate) async fn discover(&mut self) -> Result<()> {
        let issues = self.opts.source.list_issues(&self.opts.issue_labels).await?;
        let first_scan = !self.opts.state.is_initialized();

        for issue in issues {
            let number = issue.number;
            if self.opts.state.read_issue(number).is_some() {
                continue;
            }
            if first_scan {
                info!("snapshotting preexisting issue #{number} ({})", issue.title);
                self.opts.state.write_issue(
                    number,
                    &IssueRecord::new(IssueStatus::Preexisting, branch_for_issue(number)),
                )?;
                continue;
            }
            if self.active.lock().await.contains_key(&number) {
                continue;
            }

            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                info!("concurrency limit reached, deferring issue #{number}");
                continue;
            };

            let branch = branch_for_issue(number);
            self.opts.state.write_issue(
                number,
                &IssueRecord::new(IssueStatus::InProgress, branch.as_str()),
            )?;

            let token = CancellationToken::new();
            self.active.lock().await.insert(number, token.clone());
            info!("admitting issue #{number} ({})", issue.title);

            let ctx = WorkerContext {
                issue: number,
                interval: self.opts.interval,
                once: self.opts.once,
                base_branch: self.opts.base_branch.clone(),
                state: self.opts.state.clone(),
                source: self.opts.source.clone(),
                backend: self.opts.backend.clone(),
                worktrees: self.opts.worktrees.clone(),
                container: self.opts.container.clone(),
                cancel: token,
            };
            let active = self.active.clone();
            self.tasks.spawn(async move {
                let _permit = permit;
                let number = ctx.issue;
                if let Err(e) = run_worker(ctx).await {
                    warn!("worker for issue #{number} stopped: {e}");
                }
                active.lock().await.remove(&number);
            });
        }
        Ok(())
    }

    /// Wait for every spawned worker to finish, without cancelling.
    async fn drain(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    async fn shutdown(&mut self) {
        for token in self.active.lock().await.values() {
            token.cancel();
        }
        self.drain().await;
    }

    #[cfg(test)]
    pub(crate) async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
