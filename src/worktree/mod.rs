//! Git worktree lifecycle: one isolated checkout per work item.
//!
//! Real implementation: [`WorktreeManager`], shelling out to the `git`
//! CLI for worktree plumbing and using `git2` for cheap validity checks.
//! Tests substitute an in-memory provider.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ISSUE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^issue-(\d+)$").expect("valid regex"));
static PR_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pr-(\d+)$").expect("valid regex"));

/// Branch name for an issue worker. The scheduler recovers the issue
/// number from this name after a restart, so the format is load-bearing.
pub fn branch_for_issue(issue: u64) -> String {
    format!("auto/issue-{issue}")
}

pub fn worktree_name_for_issue(issue: u64) -> String {
    format!("issue-{issue}")
}

pub fn worktree_name_for_pr(pr: u64) -> String {
    format!("pr-{pr}")
}

pub fn issue_number_from_name(name: &str) -> Option<u64> {
    ISSUE_NAME_RE
        .captures(name)
        .and_then(|c| c[1].parse().ok())
}

pub fn pr_number_from_name(name: &str) -> Option<u64> {
    PR_NAME_RE.captures(name).and_then(|c| c[1].parse().ok())
}

/// What the workers need from worktree management.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    /// Worktree for an issue on its `auto/issue-<n>` branch, created from
    /// `base` if the branch does not exist yet.
    async fn create_for_issue(&self, issue: u64, base: &str) -> Result<PathBuf>;
    /// Worktree checked out on an existing branch, repairing or creating
    /// it as needed.
    async fn ensure(&self, branch: &str, name: &str) -> Result<PathBuf>;
    async fn remove(&self, name: &str) -> Result<()>;
    /// Names of all worktree directories currently on disk.
    fn list(&self) -> Result<Vec<String>>;
    fn path_for(&self, name: &str) -> PathBuf;
}

/// Relative path from `from` to `to`. Both must be absolute.
fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    if !from.is_absolute() || !to.is_absolute() {
        return None;
    }
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for comp in &to[common..] {
        rel.push(comp.as_os_str());
    }
    Some(rel)
}

pub struct WorktreeManager {
    project_root: PathBuf,
    worktree_dir: PathBuf,
}

impl WorktreeManager {
    pub fn new(project_root: &Path, worktree_dir: &str) -> Self {
        let worktree_dir = if Path::new(worktree_dir).is_absolute() {
            PathBuf::from(worktree_dir)
        } else {
            project_root.join(worktree_dir)
        };
        Self {
            project_root: project_root.to_path_buf(),
            worktree_dir,
        }
    }

    pub fn worktree_dir(&self) -> &Path {
        &self.worktree_dir
    }

    /// Run git in `dir`, failing with captured stderr on non-zero exit.
    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = tokio::process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        self.git_in(&self.project_root, args).await
    }

    /// True when `refname` resolves in the main repository.
    async fn ref_exists(&self, refname: &str) -> bool {
        self.git(&["rev-parse", "--verify", "--quiet", refname])
            .await
            .is_ok()
    }

    /// Drop stale worktree registrations left behind by deleted directories.
    async fn prune(&self) {
        if let Err(e) = self.git(&["worktree", "prune"]).await {
            debug!("git worktree prune failed: {e}");
        }
    }

    async fn refresh(&self, path: &Path, branch: &str) -> Result<()> {
        // Offline operation is fine; the fetch is best-effort.
        if let Err(e) = self.git(&["fetch", "origin", branch]).await {
            debug!("fetch origin {branch} failed: {e}");
        }
        let remote_ref = format!("origin/{branch}");
        if self.ref_exists(&remote_ref).await
            && self
                .git_in(path, &["reset", "--hard", &remote_ref])
                .await
                .is_ok()
        {
            return Ok(());
        }
        // No usable remote ref: put the worktree back on the requested
        // branch, whatever a previous agent run left checked out.
        self.git_in(path, &["checkout", branch])
            .await
            .with_context(|| format!("Failed to check out {branch} in {}", path.display()))?;
        Ok(())
    }

    async fn create(&self, path: &Path, branch: &str) -> Result<()> {
        std::fs::create_dir_all(&self.worktree_dir).with_context(|| {
            format!(
                "Failed to create worktree directory {}",
                self.worktree_dir.display()
            )
        })?;
        self.prune().await;
        self.add_worktree(path, branch).await?;
        self.relativize_gitdir_pointers(path)
    }

    async fn add_worktree(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy().to_string();
        if self
            .git(&["worktree", "add", &path_str, branch])
            .await
            .is_ok()
        {
            return Ok(());
        }

        // Branch may only exist on the remote.
        if let Err(e) = self.git(&["fetch", "origin", branch]).await {
            debug!("fetch origin {branch} failed: {e}");
        }
        if self
            .git(&["worktree", "add", &path_str, branch])
            .await
            .is_ok()
        {
            return Ok(());
        }

        let remote_ref = format!("origin/{branch}");
        self.git(&["worktree", "add", "-B", branch, &path_str, &remote_ref])
            .await
            .with_context(|| format!("Failed to create worktree for branch {branch}"))?;
        Ok(())
    }

    /// Rewrite the worktree's `.git` pointer and the admin directory's
    /// back-pointer to relative paths. Relative pointers resolve both on
    /// the host and inside a container that mounts the project root at a
    /// different absolute path, so `git worktree prune` in either place
    /// keeps treating the registration as live.
    fn relativize_gitdir_pointers(&self, path: &Path) -> Result<()> {
        let dotgit = path.join(".git");
        let contents = std::fs::read_to_string(&dotgit)
            .with_context(|| format!("Failed to read {}", dotgit.display()))?;
        let Some(target) = contents.trim().strip_prefix("gitdir: ") else {
            return Ok(());
        };
        let admin = PathBuf::from(target);
        if !admin.is_absolute() {
            return Ok(());
        }
        if let Some(rel) = relative_path(path, &admin) {
            std::fs::write(&dotgit, format!("gitdir: {}\n", rel.display()))
                .with_context(|| format!("Failed to rewrite {}", dotgit.display()))?;
        }

        let backptr = admin.join("gitdir");
        if let Ok(contents) = std::fs::read_to_string(&backptr) {
            let back = PathBuf::from(contents.trim());
            if back.is_absolute()
                && let Some(rel) = relative_path(&admin, &back)
            {
                std::fs::write(&backptr, format!("{}\n", rel.display()))
                    .with_context(|| format!("Failed to rewrite {}", backptr.display()))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorktreeProvider for WorktreeManager {
    async fn create_for_issue(&self, issue: u64, base: &str) -> Result<PathBuf> {
        let branch = branch_for_issue(issue);
        let name = worktree_name_for_issue(issue);
        let path = self.path_for(&name);
        if path.exists() {
            return self.ensure(&branch, &name).await;
        }

        if let Err(e) = self.git(&["fetch", "origin", base]).await {
            debug!("fetch origin {base} failed: {e}");
        }
        if !self.ref_exists(&branch).await {
            let start = format!("origin/{base}");
            let start = if self.ref_exists(&start).await {
                start
            } else {
                base.to_string()
            };
            self.git(&["branch", &branch, &start])
                .await
                .with_context(|| format!("Failed to create branch {branch} from {start}"))?;
        }
        self.create(&path, &branch).await?;
        Ok(path)
    }

    async fn ensure(&self, branch: &str, name: &str) -> Result<PathBuf> {
        let path = self.path_for(name);
        if path.exists() {
            match git2::Repository::open(&path) {
                Ok(_) => {
                    self.refresh(&path, branch).await?;
                    return Ok(path);
                }
                Err(e) => {
                    warn!("Worktree {name} is corrupted ({e}), recreating");
                    std::fs::remove_dir_all(&path).with_context(|| {
                        format!("Failed to remove corrupted worktree {}", path.display())
                    })?;
                }
            }
        }
        self.create(&path, branch).await?;
        Ok(path)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        let path_str = path.to_string_lossy().to_string();
        if self
            .git(&["worktree", "remove", "--force", &path_str])
            .await
            .is_err()
            && path.exists()
        {
            std::fs::remove_dir_all(&path)
                .with_context(|| format!("Failed to remove worktree {}", path.display()))?;
        }
        self.prune().await;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        if !self.worktree_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.worktree_dir).with_context(|| {
            format!(
                "Failed to read worktree directory {}",
                self.worktree_dir.display()
            )
        })? {
            let entry = entry?;
            if entry.file_type()?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.worktree_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn git_fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let out = Command::new("git")
                .arg("-C")
                .arg(dir.path())
                .args(args)
                .output()
                .unwrap();
            assert!(
                out.status.success(),
                "git {:?}: {}",
                args,
                String::from_utf8_lossy(&out.stderr)
            );
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "fixture\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "-m", "initial"]);
        dir
    }

    fn checked_out_branch(path: &Path) -> String {
        let repo = git2::Repository::open(path).unwrap();
        repo.head().unwrap().shorthand().unwrap().to_string()
    }

    #[test]
    fn naming_round_trips() {
        assert_eq!(branch_for_issue(42), "auto/issue-42");
        assert_eq!(worktree_name_for_issue(42), "issue-42");
        assert_eq!(issue_number_from_name("issue-42"), Some(42));
        assert_eq!(issue_number_from_name("issue-"), None);
        assert_eq!(issue_number_from_name("pr-7"), None);
        assert_eq!(pr_number_from_name("pr-7"), Some(7));
        assert_eq!(pr_number_from_name("issue-7"), None);
    }

    #[tokio::test]
    async fn creates_issue_worktree_from_local_base_when_offline() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        // No origin remote: fetches fail and the local base is used.
        let path = mgr.create_for_issue(7, "main").await.unwrap();
        assert!(path.join("README.md").exists());
        assert_eq!(checked_out_branch(&path), "auto/issue-7");
        assert_eq!(mgr.list().unwrap(), vec!["issue-7".to_string()]);
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        let first = mgr.create_for_issue(3, "main").await.unwrap();
        let second = mgr.create_for_issue(3, "main").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(checked_out_branch(&second), "auto/issue-3");
    }

    #[tokio::test]
    async fn corrupted_worktree_is_recreated() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        let path = mgr.create_for_issue(9, "main").await.unwrap();
        std::fs::remove_file(path.join(".git")).unwrap();
        assert!(git2::Repository::open(&path).is_err());

        let repaired = mgr.ensure("auto/issue-9", "issue-9").await.unwrap();
        assert_eq!(repaired, path);
        assert_eq!(checked_out_branch(&repaired), "auto/issue-9");
    }

    #[tokio::test]
    async fn remove_deletes_directory_and_registration() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        let path = mgr.create_for_issue(5, "main").await.unwrap();
        assert!(path.exists());
        mgr.remove("issue-5").await.unwrap();
        assert!(!path.exists());
        assert!(mgr.list().unwrap().is_empty());

        // The branch slot is free again.
        let again = mgr.create_for_issue(5, "main").await.unwrap();
        assert_eq!(checked_out_branch(&again), "auto/issue-5");
    }

    #[test]
    fn relative_path_walks_up_to_the_common_ancestor() {
        assert_eq!(
            relative_path(Path::new("/repo/.worktrees/issue-1"), Path::new("/repo/.git")),
            Some(PathBuf::from("../../.git"))
        );
        assert_eq!(
            relative_path(Path::new("/repo/.git/worktrees/issue-1"), Path::new("/repo/a/.git")),
            Some(PathBuf::from("../../../a/.git"))
        );
        assert_eq!(relative_path(Path::new("rel"), Path::new("/abs")), None);
    }

    #[tokio::test]
    async fn gitdir_pointers_are_relative_after_creation() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        let path = mgr.create_for_issue(4, "main").await.unwrap();

        let dotgit = std::fs::read_to_string(path.join(".git")).unwrap();
        let target = dotgit.trim().strip_prefix("gitdir: ").unwrap();
        assert!(!Path::new(target).is_absolute(), "gitdir pointer: {target}");

        let backptr = fixture.path().join(".git/worktrees/issue-4/gitdir");
        let contents = std::fs::read_to_string(backptr).unwrap();
        assert!(
            !Path::new(contents.trim()).is_absolute(),
            "back-pointer: {contents}"
        );
        // Both pointers still resolve on the host.
        assert!(git2::Repository::open(&path).is_ok());
    }

    #[tokio::test]
    async fn worktree_registration_survives_another_issues_creation() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");

        let first = mgr.create_for_issue(1, "main").await.unwrap();
        let admin = fixture.path().join(".git/worktrees/issue-1");
        assert!(admin.exists());

        // Another worker's create() runs `git worktree prune`; issue-1's
        // registration must still resolve and survive it.
        mgr.create_for_issue(2, "main").await.unwrap();
        assert!(
            admin.exists(),
            "issue-1 worktree registration was pruned away"
        );
        assert!(git2::Repository::open(&first).is_ok());
        assert_eq!(checked_out_branch(&first), "auto/issue-1");
    }

    #[tokio::test]
    async fn ensure_switches_back_to_the_requested_branch() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");
        let path = mgr.create_for_issue(6, "main").await.unwrap();

        // A prior agent run left the worktree on a different branch.
        let out = Command::new("git")
            .arg("-C")
            .arg(&path)
            .args(["checkout", "-b", "detour"])
            .output()
            .unwrap();
        assert!(out.status.success());
        assert_eq!(checked_out_branch(&path), "detour");

        let again = mgr.ensure("auto/issue-6", "issue-6").await.unwrap();
        assert_eq!(again, path);
        assert_eq!(checked_out_branch(&again), "auto/issue-6");
    }

    #[tokio::test]
    async fn list_ignores_missing_dir() {
        let fixture = git_fixture();
        let mgr = WorktreeManager::new(fixture.path(), ".worktrees");
        assert!(mgr.list().unwrap().is_empty());
    }
}
