//! Shared test doubles for the watch modes. Scripted responses pop off
//! queues; the last scripted value sticks so long-running loops keep
//! getting an answer.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agent::AgentBackend;
use crate::github::{
    Issue, NewActivity, PrState, ReplyResponse, Review, ReviewComment, User, WorkItemSource,
};
use crate::worktree::WorktreeProvider;

pub(crate) struct ScriptedSource {
    issue_lists: Mutex<VecDeque<Vec<Issue>>>,
    issue_details: Mutex<HashMap<u64, Issue>>,
    pr_for_branch: Mutex<HashMap<String, u64>>,
    pr_states: Mutex<HashMap<u64, VecDeque<PrState>>>,
    activity: Mutex<HashMap<u64, VecDeque<Option<NewActivity>>>>,
    latest_ts: Mutex<HashMap<u64, String>>,
    issue_states: Mutex<HashMap<u64, String>>,
    pub list_calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self {
            issue_lists: Mutex::new(VecDeque::new()),
            issue_details: Mutex::new(HashMap::new()),
            pr_for_branch: Mutex::new(HashMap::new()),
            pr_states: Mutex::new(HashMap::new()),
            activity: Mutex::new(HashMap::new()),
            latest_ts: Mutex::new(HashMap::new()),
            issue_states: Mutex::new(HashMap::new()),
            list_calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub(crate) fn make_issue(number: u64, title: &str, body: &str) -> Issue {
        serde_json::from_value(serde_json::json!({
            "number": number,
            "title": title,
            "body": body,
            "state": "open",
        }))
        .unwrap()
    }

    pub(crate) fn inline_comment(
        id: u64,
        path: &str,
        line: u64,
        body: &str,
        updated_at: &str,
    ) -> NewActivity {
        NewActivity {
            inline_comments: vec![ReviewComment {
                id,
                path: path.to_string(),
                line: Some(line),
                original_line: None,
                body: body.to_string(),
                user: User {
                    login: "reviewer".to_string(),
                },
                created_at: updated_at.to_string(),
                updated_at: updated_at.to_string(),
                pull_request_review_id: None,
            }],
            top_level_reviews: vec![],
        }
    }

    pub(crate) fn push_issue_list(&self, issues: Vec<Issue>) {
        self.issue_lists.lock().unwrap().push_back(issues);
    }

    pub(crate) fn set_issue(&self, number: u64, title: &str, body: &str) {
        self.issue_details
            .lock()
            .unwrap()
            .insert(number, Self::make_issue(number, title, body));
    }

    pub(crate) fn set_issue_state(&self, number: u64, state: &str) {
        self.issue_states
            .lock()
            .unwrap()
            .insert(number, state.to_string());
    }

    pub(crate) fn set_pr_for_branch(&self, branch: &str, pr: u64) {
        self.pr_for_branch
            .lock()
            .unwrap()
            .insert(branch.to_string(), pr);
    }

    pub(crate) fn push_pr_state(&self, pr: u64, state: PrState) {
        self.pr_states
            .lock()
            .unwrap()
            .entry(pr)
            .or_default()
            .push_back(state);
    }

    pub(crate) fn push_activity(&self, pr: u64, activity: Option<NewActivity>) {
        self.activity
            .lock()
            .unwrap()
            .entry(pr)
            .or_default()
            .push_back(activity);
    }

    pub(crate) fn set_latest_ts(&self, pr: u64, ts: &str) {
        self.latest_ts.lock().unwrap().insert(pr, ts.to_string());
    }

    fn pop_sticky<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl WorkItemSource for ScriptedSource {
    async fn list_issues(&self, _labels: &[String]) -> Result<Vec<Issue>> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut lists = self.issue_lists.lock().unwrap();
        Ok(Self::pop_sticky(&mut lists).unwrap_or_default())
    }

    async fn get_issue(&self, number: u64) -> Result<Issue> {
        let mut issue = self
            .issue_details
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted issue #{number}"))?;
        if let Some(state) = self.issue_states.lock().unwrap().get(&number) {
            issue.state = state.clone();
        }
        Ok(issue)
    }

    async fn find_pr_for_branch(&self, branch: &str) -> Result<Option<u64>> {
        Ok(self.pr_for_branch.lock().unwrap().get(branch).copied())
    }

    async fn pr_state(&self, number: u64) -> Result<PrState> {
        let mut states = self.pr_states.lock().unwrap();
        match states.get_mut(&number).and_then(Self::pop_sticky) {
            Some(state) => Ok(state),
            None => Err(anyhow!("no scripted state for PR #{number}")),
        }
    }

    async fn latest_activity_ts(&self, pr: u64) -> Result<Option<String>> {
        Ok(self.latest_ts.lock().unwrap().get(&pr).cloned())
    }

    async fn new_activity_since(&self, pr: u64, _since: &str) -> Result<Option<NewActivity>> {
        let mut activity = self.activity.lock().unwrap();
        match activity.get_mut(&pr) {
            Some(queue) => Ok(Self::pop_sticky(queue).flatten()),
            None => Ok(None),
        }
    }

    async fn default_branch(&self) -> Result<String> {
        Ok("main".to_string())
    }

    async fn review_comments(&self, _pr: u64) -> Result<Vec<ReviewComment>> {
        Ok(Vec::new())
    }

    async fn reviews(&self, _pr: u64) -> Result<Vec<Review>> {
        Ok(Vec::new())
    }

    async fn reply_to_comment(
        &self,
        _pr: u64,
        comment_id: u64,
        _body: &str,
    ) -> Result<ReplyResponse> {
        Ok(ReplyResponse {
            id: comment_id + 1,
            user: User {
                login: "autopr".to_string(),
            },
        })
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRun {
    pub continued: bool,
    pub prompt: String,
}

/// Agent double that records prompts. Results pop off a queue, default
/// Ok(true). An optional gate makes runs block until released, for
/// admission tests.
pub(crate) struct RecordingBackend {
    runs: Mutex<Vec<RecordedRun>>,
    results: Mutex<VecDeque<Result<bool>>>,
    gate: Option<std::sync::Arc<tokio::sync::Notify>>,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            gate: None,
        }
    }

    pub(crate) fn gated(gate: std::sync::Arc<tokio::sync::Notify>) -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            gate: Some(gate),
        }
    }

    pub(crate) fn push_result(&self, result: Result<bool>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub(crate) fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }

    async fn record(&self, continued: bool, prompt: &str) -> Result<bool> {
        self.runs.lock().unwrap().push(RecordedRun {
            continued,
            prompt: prompt.to_string(),
        });
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match self.results.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(true),
        }
    }
}

#[async_trait]
impl AgentBackend for RecordingBackend {
    async fn run(
        &self,
        _dir: &std::path::Path,
        prompt: &str,
        _log: Option<&std::path::Path>,
    ) -> Result<bool> {
        self.record(false, prompt).await
    }

    async fn run_continued(
        &self,
        _dir: &std::path::Path,
        prompt: &str,
        _log: Option<&std::path::Path>,
    ) -> Result<bool> {
        self.record(true, prompt).await
    }
}

/// Worktree double backed by plain directories in a temp dir.
pub(crate) struct MemoryWorktrees {
    root: tempfile::TempDir,
}

impl MemoryWorktrees {
    pub(crate) fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
        }
    }

    pub(crate) fn seed(&self, name: &str) {
        std::fs::create_dir_all(self.path_for(name)).unwrap();
    }
}

#[async_trait]
impl WorktreeProvider for MemoryWorktrees {
    async fn create_for_issue(&self, issue: u64, _base: &str) -> Result<PathBuf> {
        let path = self.path_for(&crate::worktree::worktree_name_for_issue(issue));
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    async fn ensure(&self, _branch: &str, name: &str) -> Result<PathBuf> {
        let path = self.path_for(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.root.path())? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}
