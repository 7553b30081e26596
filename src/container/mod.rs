//! Docker-based isolation for agent runs.
//!
//! Each worker gets one long-lived container with the project root
//! mounted at [`WORKSPACE`]; agent invocations happen via `docker exec`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::util::{run_streaming, which};

/// Mount point of the project root inside worker containers.
pub const WORKSPACE: &str = "/workspace";

/// Fallback image definition used when the project ships no
/// `Dockerfile.autopr` and no override is configured.
const DEFAULT_DOCKERFILE: &str = r#"FROM node:22-slim

RUN apt-get update && apt-get install -y --no-install-recommends \
    git openssh-client ca-certificates curl jq \
    && rm -rf /var/lib/apt/lists/*

RUN curl -fsSL https://cli.github.com/packages/githubcli-archive-keyring.gpg \
      -o /usr/share/keyrings/githubcli-archive-keyring.gpg \
    && echo "deb [signed-by=/usr/share/keyrings/githubcli-archive-keyring.gpg] \
      https://cli.github.com/packages stable main" \
      > /etc/apt/sources.list.d/github-cli.list \
    && apt-get update && apt-get install -y --no-install-recommends gh \
    && rm -rf /var/lib/apt/lists/*

RUN npm install -g @anthropic-ai/claude-code

WORKDIR /workspace
"#;

pub struct ContainerManager {
    image: String,
    project_root: PathBuf,
    dockerfile: Option<PathBuf>,
}

impl ContainerManager {
    pub fn new(image: &str, project_root: &Path, dockerfile: Option<PathBuf>) -> Self {
        Self {
            image: image.to_string(),
            project_root: project_root.to_path_buf(),
            dockerfile,
        }
    }

    pub fn detect() -> bool {
        which("docker").is_some()
    }

    /// Container name for a worktree-style work item name such as
    /// `issue-42` or `pr-7`.
    pub fn container_name(worktree_name: &str) -> String {
        format!("autopr-{worktree_name}")
    }

    /// Host path translated to its location inside the container.
    pub fn to_container_path(&self, host: &Path) -> String {
        let host = host.to_string_lossy();
        let root = self.project_root.to_string_lossy();
        match host.strip_prefix(root.as_ref()) {
            Some(rest) => format!("{WORKSPACE}{rest}"),
            None => host.to_string(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new("docker")
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run docker {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "docker {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Build the worker image if it is not present locally.
    pub async fn ensure_image(&self) -> Result<()> {
        if self
            .docker(&["image", "inspect", &self.image])
            .await
            .is_ok()
        {
            return Ok(());
        }

        let dockerfile = self.resolve_dockerfile()?;
        info!(
            "Building image {} from {}",
            self.image,
            dockerfile.display()
        );
        let mut cmd = tokio::process::Command::new("docker");
        cmd.arg("build")
            .arg("-t")
            .arg(&self.image)
            .arg("-f")
            .arg(&dockerfile)
            .arg(&self.project_root);
        if !run_streaming(cmd, None).await? {
            bail!("docker build of image {} failed", self.image);
        }
        Ok(())
    }

    /// Dockerfile resolution order: configured override, then
    /// `Dockerfile.autopr` in the project root, then the embedded default
    /// written to the system temp directory.
    fn resolve_dockerfile(&self) -> Result<PathBuf> {
        if let Some(path) = &self.dockerfile {
            if !path.exists() {
                bail!("Configured Dockerfile {} does not exist", path.display());
            }
            return Ok(path.clone());
        }
        let local = self.project_root.join("Dockerfile.autopr");
        if local.exists() {
            return Ok(local);
        }
        let path = std::env::temp_dir().join("autopr-default.Dockerfile");
        std::fs::write(&path, DEFAULT_DOCKERFILE)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    /// Start a fresh container for a worker, replacing any stale one with
    /// the same name. The project root is mounted read-write at
    /// [`WORKSPACE`] and `~/.claude` is shared when present.
    pub async fn start(&self, name: &str, env: &[(String, String)]) -> Result<()> {
        // A container left over from a previous run holds the name.
        if let Err(e) = self.docker(&["rm", "-f", name]).await {
            tracing::debug!("no stale container to remove: {e}");
        }

        let root_mount = format!("{}:{WORKSPACE}", self.project_root.display());
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name.into(),
            "-v".into(),
            root_mount,
        ];
        if let Some(home) = dirs::home_dir() {
            let claude_dir = home.join(".claude");
            if claude_dir.exists() {
                args.push("-v".into());
                args.push(format!("{}:/root/.claude", claude_dir.display()));
            }
        }
        for (key, value) in env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.push("sleep".into());
        args.push("infinity".into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(&arg_refs)
            .await
            .with_context(|| format!("Failed to start container {name}"))?;
        Ok(())
    }

    /// Run a command inside the container, streaming output.
    pub async fn exec(
        &self,
        name: &str,
        workdir: &str,
        command: &[String],
        log: Option<&Path>,
    ) -> Result<bool> {
        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(["exec", "-w", workdir, name]).args(command);
        run_streaming(cmd, log).await
    }

    pub async fn stop(&self, name: &str) {
        if let Err(e) = self.docker(&["rm", "-f", name]).await {
            warn!("Failed to remove container {name}: {e}");
        }
    }
}

/// Environment forwarded into worker containers: API and GitHub
/// credentials from the host, nothing else.
pub fn worker_env(github_token: Option<&str>) -> Vec<(String, String)> {
    let mut env = Vec::new();
    if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
        && !key.is_empty()
    {
        env.push(("ANTHROPIC_API_KEY".to_string(), key));
    }
    if let Some(token) = github_token {
        env.push(("GH_TOKEN".to_string(), token.to_string()));
    }
    env
}
