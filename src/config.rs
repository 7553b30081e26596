//! `.pr-watch.conf` configuration.
//!
//! Flat `KEY=VALUE` file at the project root. Unknown keys are ignored,
//! quoted values are unwrapped, and `#` starts a comment (whole-line or
//! inline after an unquoted value). A missing file is not an error —
//! defaults apply, and `generate_default` drops a commented-out template
//! so the format is discoverable.

use std::path::{Path, PathBuf};

/// Watch configuration, file values overridable by CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_concurrent: usize,
    pub interval_secs: u64,
    pub issue_labels: String,
    pub worktree_dir: String,
    pub base_branch: Option<String>,
    pub docker_enabled: bool,
    pub docker_image: String,
    pub docker_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            interval_secs: 30,
            issue_labels: "auto,claude".to_string(),
            worktree_dir: ".worktrees".to_string(),
            base_branch: None,
            docker_enabled: false,
            docker_image: "auto-pr-worker".to_string(),
            docker_file: None,
        }
    }
}

const DEFAULT_CONF_TEMPLATE: &str = r#"# auto-pr watch configuration
# Uncomment and edit values as needed. Defaults are shown.

# Max concurrent workers
# MAX_CONCURRENT=2

# Poll interval in seconds
# INTERVAL=30

# Issue labels that trigger auto-processing (comma-separated, OR logic)
# ISSUE_LABELS="auto,claude"

# Directory for git worktrees
# WORKTREE_DIR=".worktrees"

# Base branch for new issue branches (default: repo default branch)
# BASE_BRANCH="main"

# Enable Docker container isolation (true/false)
# DOCKER=false

# Docker image name for worker containers
# DOCKER_IMAGE="auto-pr-worker"

# Custom Dockerfile path (default: auto-resolve)
# Lookup order: DOCKER_FILE -> {repo}/Dockerfile.autopr -> embedded default
# DOCKER_FILE=""
"#;

impl Config {
    /// Create `.pr-watch.conf` with commented-out defaults if it does not
    /// already exist. Returns true if a file was created.
    pub fn generate_default(project_root: &Path) -> bool {
        let path = project_root.join(".pr-watch.conf");
        if path.exists() {
            return false;
        }
        std::fs::write(&path, DEFAULT_CONF_TEMPLATE).is_ok()
    }

    /// Load `.pr-watch.conf` from the project root. A missing file yields
    /// the defaults; invalid values for numeric keys are ignored.
    pub fn load(project_root: &Path) -> Self {
        let mut cfg = Self::default();
        let Ok(content) = std::fs::read_to_string(project_root.join(".pr-watch.conf")) else {
            return cfg;
        };

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let val = unquote(raw.trim());

            match key {
                "MAX_CONCURRENT" => {
                    if let Ok(n) = val.parse::<usize>()
                        && n > 0
                    {
                        cfg.max_concurrent = n;
                    }
                }
                "INTERVAL" => {
                    if let Ok(n) = val.parse::<u64>()
                        && n > 0
                    {
                        cfg.interval_secs = n;
                    }
                }
                "ISSUE_LABELS" => cfg.issue_labels = val,
                "WORKTREE_DIR" => {
                    if !val.is_empty() {
                        cfg.worktree_dir = val;
                    }
                }
                "BASE_BRANCH" => {
                    cfg.base_branch = if val.is_empty() { None } else { Some(val) };
                }
                "DOCKER" => {
                    cfg.docker_enabled = matches!(val.as_str(), "true" | "1" | "yes");
                }
                "DOCKER_IMAGE" => {
                    if !val.is_empty() {
                        cfg.docker_image = val;
                    }
                }
                "DOCKER_FILE" => {
                    cfg.docker_file = if val.is_empty() {
                        None
                    } else {
                        Some(PathBuf::from(val))
                    };
                }
                _ => {}
            }
        }
        cfg
    }
}

/// Strip surrounding quotes, or an inline `#` comment from an unquoted value.
fn unquote(val: &str) -> String {
    let bytes = val.as_bytes();
    if let Some(&q) = bytes.first()
        && (q == b'"' || q == b'\'')
    {
        if let Some(end) = val[1..].find(q as char) {
            return val[1..end + 1].to_string();
        }
        return val.trim_matches(|c| c == '"' || c == '\'').to_string();
    }
    if let Some(idx) = val.find('#') {
        return val[..idx].trim().to_string();
    }
    val.to_string()
}
