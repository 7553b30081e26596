//! Coding-agent invocation seam.
//!
//! Real implementations: [`LocalAgent`] (the `claude` CLI on the host)
//! and [`ContainerAgent`] (the same CLI via `docker exec`). Tests
//! substitute a recording backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::container::ContainerManager;
use crate::util::run_streaming;

/// Runs one agent session in a working directory.
///
/// Ok(true) means the agent exited zero, Ok(false) a non-zero exit, Err
/// that the agent could not be executed at all.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool>;
    /// Continue the most recent session in `dir` instead of starting
    /// a fresh one.
    async fn run_continued(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool>;
}

pub struct LocalAgent {
    claude_cmd: String,
}

impl LocalAgent {
    pub fn new() -> Self {
        let claude_cmd = std::env::var("CLAUDE_CMD")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "claude".to_string());
        Self { claude_cmd }
    }

    pub fn with_command(claude_cmd: &str) -> Self {
        Self {
            claude_cmd: claude_cmd.to_string(),
        }
    }

    pub fn command_name(&self) -> &str {
        &self.claude_cmd
    }

    async fn invoke(
        &self,
        dir: &Path,
        prompt: &str,
        continued: bool,
        log: Option<&Path>,
    ) -> Result<bool> {
        let mut cmd = tokio::process::Command::new(&self.claude_cmd);
        cmd.current_dir(dir);
        if continued {
            cmd.arg("--continue");
        }
        cmd.args(["-p", prompt, "--verbose"]);
        run_streaming(cmd, log).await
    }
}

impl Default for LocalAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBackend for LocalAgent {
    async fn run(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool> {
        self.invoke(dir, prompt, false, log).await
    }

    async fn run_continued(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool> {
        self.invoke(dir, prompt, true, log).await
    }
}

/// Agent sessions executed inside a worker container. Host paths are
/// translated to their `/workspace` equivalents before exec.
pub struct ContainerAgent {
    manager: Arc<ContainerManager>,
    container: String,
}

impl ContainerAgent {
    pub fn new(manager: Arc<ContainerManager>, container: &str) -> Self {
        Self {
            manager,
            container: container.to_string(),
        }
    }

    async fn invoke(
        &self,
        dir: &Path,
        prompt: &str,
        continued: bool,
        log: Option<&Path>,
    ) -> Result<bool> {
        let workdir = self.manager.to_container_path(dir);
        let mut command: Vec<String> = vec!["claude".into()];
        if continued {
            command.push("--continue".into());
        }
        command.extend(["-p".into(), prompt.to_string(), "--verbose".into()]);
        self.manager
            .exec(&self.container, &workdir, &command, log)
            .await
    }
}

#[async_trait]
impl AgentBackend for ContainerAgent {
    async fn run(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool> {
        self.invoke(dir, prompt, false, log).await
    }

    async fn run_continued(&self, dir: &Path, prompt: &str, log: Option<&Path>) -> Result<bool> {
        self.invoke(dir, prompt, true, log).await
    }
}
