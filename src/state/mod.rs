//! Durable state for watched issues and PRs.
//!
//! Everything lives under `.pr-watch-state/` in the project root:
//! one JSON document per issue (`issues/<N>.json`), one per PR
//! (`prs/<N>.json`), a `.initialized` sentinel marking the first scan,
//! and an append-only log per issue worker (`logs/issue-<N>.log`).
//!
//! Writes are atomic with respect to process crash: a temp file in the
//! same directory is renamed into place, so a reader only ever observes
//! the old document or the new one. There is no cross-process locking;
//! ownership is partitioned by issue/PR number — the scheduler creates a
//! record, and only the worker spawned for that number mutates it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Lifecycle status of a tracked issue. Transitions are forward-only:
/// `in_progress -> {watching, failed}`, `watching -> {done, failed}`;
/// `preexisting`, `done` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Preexisting,
    InProgress,
    Watching,
    Done,
    Failed,
}

impl IssueStatus {
    /// True once a worker for this issue can no longer be running.
    pub fn is_finished(self) -> bool {
        matches!(self, IssueStatus::Done | IssueStatus::Failed)
    }

    /// True while a worker owns this issue.
    pub fn is_active(self) -> bool {
        matches!(self, IssueStatus::InProgress | IssueStatus::Watching)
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(self, next: IssueStatus) -> bool {
        use IssueStatus::*;
        matches!(
            (self, next),
            (InProgress, Watching) | (InProgress, Failed) | (Watching, Done) | (Watching, Failed)
        )
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueStatus::Preexisting => "preexisting",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Watching => "watching",
            IssueStatus::Done => "done",
            IssueStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persisted record for one tracked issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRecord {
    pub status: IssueStatus,
    #[serde(default)]
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
}

impl IssueRecord {
    pub fn new(status: IssueStatus, branch: impl Into<String>) -> Self {
        Self {
            status,
            branch: branch.into(),
            pr_number: None,
        }
    }

    pub fn with_pr(mut self, pr: u64) -> Self {
        self.pr_number = Some(pr);
        self
    }
}

/// Persisted record for one watched PR. `last_comment_ts` is the
/// high-water mark of review activity already processed (ISO-8601,
/// compared lexicographically) and never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrRecord {
    pub last_comment_ts: String,
    #[serde(default)]
    pub branch: String,
}

/// Handle to the `.pr-watch-state` directory.
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(project_root: &Path) -> Self {
        Self {
            root: project_root.join(".pr-watch-state"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory structure, migrating a legacy flat state file
    /// first if one is found where the directory should be.
    pub fn init(&self) -> Result<()> {
        if let Err(e) = self.migrate_legacy() {
            warn!("state migration failed: {e:#}");
        }
        for sub in ["issues", "prs", "logs"] {
            let dir = self.root.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create state dir {}", dir.display()))?;
        }
        Ok(())
    }

    /// Older versions kept a single flat file at the state path with lines
    /// of `<prNumber>_<timestamp>`. Convert it into per-PR documents.
    /// Unparseable lines are skipped, not fatal.
    fn migrate_legacy(&self) -> Result<()> {
        let Ok(meta) = std::fs::metadata(&self.root) else {
            return Ok(()); // nothing there yet
        };
        if meta.is_dir() {
            return Ok(()); // already migrated
        }

        warn!("migrating legacy state file to directory layout");
        let content = std::fs::read_to_string(&self.root).context("read legacy state file")?;
        std::fs::remove_file(&self.root).context("remove legacy state file")?;

        let prs_dir = self.root.join("prs");
        std::fs::create_dir_all(&prs_dir).context("create prs dir")?;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((num, ts)) = line.split_once('_') else {
                warn!("skipping malformed legacy state line: {line:?}");
                continue;
            };
            if num.is_empty() || ts.is_empty() || num.parse::<u64>().is_err() {
                warn!("skipping malformed legacy state line: {line:?}");
                continue;
            }
            let record = PrRecord {
                last_comment_ts: ts.to_string(),
                branch: String::new(),
            };
            let data = serde_json::to_vec(&record)?;
            if let Err(e) = atomic_write(&prs_dir.join(format!("{num}.json")), &data) {
                warn!("could not migrate PR {num}: {e:#}");
            }
        }
        Ok(())
    }

    /// True once the first scan has completed.
    pub fn is_initialized(&self) -> bool {
        self.root.join(".initialized").exists()
    }

    /// Create the first-scan sentinel.
    pub fn mark_initialized(&self) -> Result<()> {
        std::fs::write(self.root.join(".initialized"), b"").context("write .initialized sentinel")
    }

    /// Log file path for an issue worker.
    pub fn log_path(&self, issue: u64) -> PathBuf {
        self.root.join("logs").join(format!("issue-{issue}.log"))
    }

    /// Read the record for an issue. Missing or malformed files read as None.
    pub fn read_issue(&self, issue: u64) -> Option<IssueRecord> {
        read_json(&self.issue_path(issue))
    }

    /// Atomically write the record for an issue.
    pub fn write_issue(&self, issue: u64, record: &IssueRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        atomic_write(&self.issue_path(issue), &data)
    }

    pub fn read_pr(&self, pr: u64) -> Option<PrRecord> {
        read_json(&self.pr_path(pr))
    }

    pub fn write_pr(&self, pr: u64, record: &PrRecord) -> Result<()> {
        let data = serde_json::to_vec(record)?;
        atomic_write(&self.pr_path(pr), &data)
    }

    fn issue_path(&self, issue: u64) -> PathBuf {
        self.root.join("issues").join(format!("{issue}.json"))
    }

    fn pr_path(&self, pr: u64) -> PathBuf {
        self.root.join("prs").join(format!("{pr}.json"))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

/// Write `data` to `path` via a temp file in the same directory plus a
/// rename, so a crash mid-write never leaves a truncated document.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().context("state path has no parent")?;
    let tmp = dir.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));

    let result = (|| -> Result<()> {
        let mut f = std::fs::File::create(&tmp)
            .with_context(|| format!("create temp file {}", tmp.display()))?;
        f.write_all(data).context("write temp file")?;
        f.sync_all().context("sync temp file")?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("rename temp file into {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Append entries to the project `.gitignore` unless already present
/// (exact line match). Best-effort; failures are silent like the rest of
/// gitignore upkeep.
pub fn ensure_gitignore(project_root: &Path, entries: &[&str]) {
    let path = project_root.join(".gitignore");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();

    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return;
    }

    let Ok(mut f) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    else {
        return;
    };
    let mut block = String::new();
    if !existing.is_empty() && !existing.ends_with('\n') {
        block.push('\n');
    }
    block.push_str("\n# auto-pr state (auto-generated)\n");
    for entry in missing {
        block.push_str(entry);
        block.push('\n');
    }
    let _ = f.write_all(block.as_bytes());
}
