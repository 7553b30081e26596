//! `autopr watch` — single-PR watch mode or the repo-level scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use autopr::agent::{AgentBackend, ContainerAgent, LocalAgent};
use autopr::config::Config;
use autopr::container::{ContainerManager, worker_env};
use autopr::errors::EnvironmentError;
use autopr::github::{WorkItemSource, detect_repo_slug, resolve_token};
use autopr::state::{StateDir, ensure_gitignore};
use autopr::util::{find_project_root, which};
use autopr::watch::repo::{RepoOptions, RepoWatcher};
use autopr::watch::single_pr::{SinglePrOptions, watch_single_pr};
use autopr::watch::worker::ContainerSpec;
use autopr::worktree::{WorktreeManager, worktree_name_for_pr};

use super::{current_branch, resolve_pr};

pub struct WatchParams {
    pub pr: Option<u64>,
    pub repo: bool,
    pub interval: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub labels: Option<String>,
    pub base_branch: Option<String>,
    pub docker: bool,
    pub once: bool,
}

pub async fn cmd_watch(params: WatchParams) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let Some(project_root) = find_project_root(&cwd) else {
        return Err(EnvironmentError::NotARepository { start: cwd }.into());
    };

    if Config::generate_default(&project_root) {
        info!("wrote default .pr-watch.conf, edit it to change defaults");
    }
    let mut config = Config::load(&project_root);
    if let Some(interval) = params.interval {
        config.interval_secs = interval;
    }
    if let Some(max) = params.max_concurrent {
        config.max_concurrent = max;
    }
    if let Some(labels) = &params.labels {
        config.issue_labels = labels.clone();
    }
    if let Some(base) = &params.base_branch {
        config.base_branch = Some(base.clone());
    }
    if params.docker {
        config.docker_enabled = true;
    }

    // Environment checks up front: these are the only failures that
    // surface through the process exit code.
    if which("git").is_none() {
        return Err(EnvironmentError::ToolNotFound {
            tool: "git",
            hint: "Install git and make sure it is in PATH",
        }
        .into());
    }
    let local_agent = LocalAgent::new();
    if config.docker_enabled {
        if !ContainerManager::detect() {
            return Err(EnvironmentError::ToolNotFound {
                tool: "docker",
                hint: "Install Docker or drop the --docker flag",
            }
            .into());
        }
    } else if which(local_agent.command_name()).is_none() {
        return Err(EnvironmentError::ToolNotFound {
            tool: "claude",
            hint: "Install the Claude CLI or point CLAUDE_CMD at it",
        }
        .into());
    }
    let Some(token) = resolve_token().await else {
        return Err(EnvironmentError::NoToken.into());
    };

    let slug = detect_repo_slug(&project_root)?;
    let source: Arc<dyn WorkItemSource> =
        Arc::new(autopr::github::GitHubClient::new(&slug, &token)?);
    info!("watching repository {slug}");

    let state = StateDir::new(&project_root);
    state.init()?;
    let worktree_entry = format!("{}/", config.worktree_dir.trim_end_matches('/'));
    ensure_gitignore(&project_root, &[".pr-watch-state/", worktree_entry.as_str()]);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let base_branch = match &config.base_branch {
        Some(base) => base.clone(),
        None => source
            .default_branch()
            .await
            .context("Failed to resolve the repository default branch")?,
    };

    let container = if config.docker_enabled {
        let manager = Arc::new(ContainerManager::new(
            &config.docker_image,
            &project_root,
            config.docker_file.clone(),
        ));
        manager.ensure_image().await?;
        Some(ContainerSpec {
            manager,
            env: worker_env(Some(&token)),
        })
    } else {
        None
    };
    let interval = Duration::from_secs(config.interval_secs.max(1));

    if params.repo {
        let worktrees = Arc::new(WorktreeManager::new(&project_root, &config.worktree_dir));
        let labels: Vec<String> = config
            .issue_labels
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let mut watcher = RepoWatcher::new(RepoOptions {
            interval,
            once: params.once,
            max_concurrent: config.max_concurrent,
            issue_labels: labels,
            base_branch,
            state,
            source,
            backend: Arc::new(local_agent),
            worktrees,
            container,
        });
        return watcher.run(cancel).await;
    }

    // Single-PR mode: resolve the PR from the argument or the branch
    // currently checked out in the main working copy.
    let client = autopr::github::GitHubClient::new(&slug, &token)?;
    let pr = resolve_pr(&client, &project_root, params.pr).await?;
    let branch = current_branch(&project_root).unwrap_or_default();

    let mut container_name = None;
    let backend: Arc<dyn AgentBackend> = match &container {
        Some(spec) => {
            let name = ContainerManager::container_name(&worktree_name_for_pr(pr));
            spec.manager.start(&name, &spec.env).await?;
            container_name = Some((spec.manager.clone(), name.clone()));
            Arc::new(ContainerAgent::new(spec.manager.clone(), &name))
        }
        None => Arc::new(LocalAgent::new()),
    };

    let result = watch_single_pr(SinglePrOptions {
        pr,
        branch,
        interval,
        once: params.once,
        project_root,
        state,
        source,
        backend,
        cancel,
    })
    .await;

    if let Some((manager, name)) = container_name {
        manager.stop(&name).await;
    }
    result
}
