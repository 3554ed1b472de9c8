//! Test doubles and fixture repositories.
//!
//! Compiled for unit tests and behind the `test-support` feature so
//! integration tests and the agent crate can share the same fakes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use crate::core::errors::WorkflowError;
use crate::core::types::{CommitRef, PrHandle};
use crate::io::config::Timeouts;
use crate::io::git::GitRepository;
use crate::io::pr::{PrGateway, PrRequest};
use crate::io::repo::RepositoryHandle;
use crate::io::time::{Clock, Sleeper};

/// 2026-01-02T03:04:05Z, the default instant for [`FixedClock`].
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
        .single()
        .unwrap_or_default()
}

/// Repository primitives, as recorded and scripted by [`FakeRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FakeOp {
    CurrentBranch,
    Fetch,
    CreateBranch,
    Checkout,
    Stage,
    Commit,
    Push,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeCommit {
    pub branch: String,
    pub message: String,
    pub files: Vec<PathBuf>,
    pub commit_ref: CommitRef,
}

#[derive(Debug, Default)]
struct FakeRepoState {
    current: String,
    branches: BTreeSet<String>,
    staged: BTreeSet<PathBuf>,
    commits: Vec<FakeCommit>,
    pushed: Vec<String>,
    calls: Vec<FakeOp>,
    failures: BTreeMap<FakeOp, VecDeque<WorkflowError>>,
    switch_after: BTreeMap<FakeOp, String>,
}

/// In-memory [`RepositoryHandle`] with scripted failures.
///
/// Clones share state, so a test keeps one clone for inspection while the
/// code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeRepository {
    state: Arc<Mutex<FakeRepoState>>,
}

impl FakeRepository {
    pub fn on_branch(name: &str) -> Self {
        let repo = Self::default();
        {
            let mut state = repo.lock();
            state.current = name.to_string();
            state.branches.insert(name.to_string());
        }
        repo
    }

    /// Fail the next invocation of `op` with `err`.
    pub fn fail_next(&self, op: FakeOp, err: WorkflowError) -> &Self {
        self.fail_times(op, 1, err)
    }

    /// Fail the next `times` invocations of `op` with `err`.
    pub fn fail_times(&self, op: FakeOp, times: usize, err: WorkflowError) -> &Self {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
        self
    }

    /// After the next successful `op`, silently move HEAD to `branch`.
    pub fn switch_branch_after(&self, op: FakeOp, branch: &str) -> &Self {
        self.lock().switch_after.insert(op, branch.to_string());
        self
    }

    pub fn current(&self) -> String {
        self.lock().current.clone()
    }

    pub fn branches(&self) -> BTreeSet<String> {
        self.lock().branches.clone()
    }

    pub fn commits(&self) -> Vec<FakeCommit> {
        self.lock().commits.clone()
    }

    pub fn pushed(&self) -> Vec<String> {
        self.lock().pushed.clone()
    }

    pub fn calls(&self) -> Vec<FakeOp> {
        self.lock().calls.clone()
    }

    /// Invocations of `op`, failed ones included.
    pub fn call_count(&self, op: FakeOp) -> usize {
        self.lock().calls.iter().filter(|call| **call == op).count()
    }

    /// Invocations of anything other than `current_branch`.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| **call != FakeOp::CurrentBranch)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, FakeRepoState> {
        self.state.lock().expect("fake repository lock")
    }

    fn enter(&self, op: FakeOp) -> Result<MutexGuard<'_, FakeRepoState>, WorkflowError> {
        let mut state = self.lock();
        state.calls.push(op);
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    fn after(state: &mut FakeRepoState, op: FakeOp) {
        if let Some(branch) = state.switch_after.remove(&op) {
            state.branches.insert(branch.clone());
            state.current = branch;
        }
    }
}

impl RepositoryHandle for FakeRepository {
    fn current_branch(&self) -> Result<String, WorkflowError> {
        let mut state = self.enter(FakeOp::CurrentBranch)?;
        let current = state.current.clone();
        Self::after(&mut state, FakeOp::CurrentBranch);
        Ok(current)
    }

    fn fetch(&mut self, _remote_ref: &str) -> Result<(), WorkflowError> {
        let mut state = self.enter(FakeOp::Fetch)?;
        Self::after(&mut state, FakeOp::Fetch);
        Ok(())
    }

    fn create_branch(&mut self, name: &str, _base_ref: &str) -> Result<(), WorkflowError> {
        let mut state = self.enter(FakeOp::CreateBranch)?;
        if !state.branches.insert(name.to_string()) {
            return Err(WorkflowError::Vcs(format!(
                "git branch {name}: fatal: a branch named '{name}' already exists"
            )));
        }
        Self::after(&mut state, FakeOp::CreateBranch);
        Ok(())
    }

    fn checkout(&mut self, name: &str) -> Result<(), WorkflowError> {
        let mut state = self.enter(FakeOp::Checkout)?;
        if !state.branches.contains(name) {
            return Err(WorkflowError::Vcs(format!(
                "git checkout {name}: error: pathspec '{name}' did not match"
            )));
        }
        state.current = name.to_string();
        Self::after(&mut state, FakeOp::Checkout);
        Ok(())
    }

    fn stage(&mut self, paths: &[PathBuf]) -> Result<(), WorkflowError> {
        let mut state = self.enter(FakeOp::Stage)?;
        state.staged.extend(paths.iter().cloned());
        Self::after(&mut state, FakeOp::Stage);
        Ok(())
    }

    fn commit(&mut self, message: &str) -> Result<CommitRef, WorkflowError> {
        let mut state = self.enter(FakeOp::Commit)?;
        if state.staged.is_empty() {
            return Err(WorkflowError::Vcs("no staged changes to commit".to_string()));
        }
        let commit_ref = CommitRef(format!("{:040x}", state.commits.len() + 1));
        let files = std::mem::take(&mut state.staged).into_iter().collect();
        let branch = state.current.clone();
        state.commits.push(FakeCommit {
            branch,
            message: message.to_string(),
            files,
            commit_ref: commit_ref.clone(),
        });
        Self::after(&mut state, FakeOp::Commit);
        Ok(commit_ref)
    }

    fn push(&mut self, branch: &str) -> Result<(), WorkflowError> {
        let mut state = self.enter(FakeOp::Push)?;
        state.pushed.push(branch.to_string());
        Self::after(&mut state, FakeOp::Push);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FakePrState {
    requests: Vec<PrRequest>,
    labels: Vec<(u64, Vec<String>)>,
    create_failures: VecDeque<WorkflowError>,
    always_fail: Option<WorkflowError>,
    label_failure: Option<WorkflowError>,
}

/// In-memory [`PrGateway`]. PR numbers count up from 1.
#[derive(Debug, Clone, Default)]
pub struct FakePrGateway {
    state: Arc<Mutex<FakePrState>>,
}

impl FakePrGateway {
    /// Every `create_pr` fails with `err`.
    pub fn failing(err: WorkflowError) -> Self {
        let gateway = Self::default();
        gateway.lock().always_fail = Some(err);
        gateway
    }

    pub fn fail_next(&self, err: WorkflowError) -> &Self {
        self.lock().create_failures.push_back(err);
        self
    }

    pub fn fail_labels(&self, err: WorkflowError) -> &Self {
        self.lock().label_failure = Some(err);
        self
    }

    /// Requests that reached the gateway, failed ones included.
    pub fn requests(&self) -> Vec<PrRequest> {
        self.lock().requests.clone()
    }

    pub fn labels(&self) -> Vec<(u64, Vec<String>)> {
        self.lock().labels.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakePrState> {
        self.state.lock().expect("fake pr gateway lock")
    }
}

impl PrGateway for FakePrGateway {
    fn create_pr(&self, request: &PrRequest) -> Result<PrHandle, WorkflowError> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = &state.always_fail {
            return Err(err.clone());
        }
        let number = state.requests.len() as u64;
        Ok(PrHandle {
            url: format!("https://example.invalid/pull/{number}"),
            number,
        })
    }

    fn add_labels(&self, pr: &PrHandle, labels: &[String]) -> Result<(), WorkflowError> {
        let mut state = self.lock();
        if let Some(err) = &state.label_failure {
            return Err(err.clone());
        }
        state.labels.push((pr.number, labels.to_vec()));
        Ok(())
    }
}

/// Clock frozen at a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("fixed clock lock");
        *now += by;
    }
}

impl Default for FixedClock {
    fn default() -> Self {
        Self::new(fixed_now())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("fixed clock lock")
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().expect("sleeper lock").clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().expect("sleeper lock").push(duration);
    }
}

/// A real git working tree in a temp dir, on `main` with one commit
/// (`README.md`), optionally wired to a bare `origin`.
pub struct TestRepo {
    _temp: TempDir,
    workdir: PathBuf,
    remote: Option<PathBuf>,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let workdir = temp.path().join("work");
        fs::create_dir_all(&workdir).context("create work dir")?;
        let repo = Self {
            _temp: temp,
            workdir,
            remote: None,
        };
        repo.run_git(&["init", "--quiet"])?;
        repo.run_git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.run_git(&["config", "user.email", "gitward@example.invalid"])?;
        repo.run_git(&["config", "user.name", "gitward tests"])?;
        repo.run_git(&["config", "commit.gpgsign", "false"])?;
        repo.run_git(&["config", "core.hooksPath", ".git/hooks"])?;
        repo.write_file("README.md", "# fixture\n")?;
        repo.run_git(&["add", "README.md"])?;
        repo.run_git(&["commit", "--quiet", "-m", "chore: initial commit"])?;
        Ok(repo)
    }

    /// Like [`TestRepo::new`], plus a bare `origin` that already has `main`.
    pub fn with_remote() -> Result<Self> {
        let mut repo = Self::new()?;
        let remote = repo.workdir.with_file_name("remote.git");
        let status = Command::new("git")
            .args(["init", "--quiet", "--bare"])
            .arg(&remote)
            .status()
            .context("spawn git init --bare")?;
        if !status.success() {
            return Err(anyhow!("git init --bare failed"));
        }
        let remote_arg = remote.to_string_lossy().to_string();
        repo.run_git(&["remote", "add", "origin", &remote_arg])?;
        repo.run_git(&["push", "--quiet", "-u", "origin", "main"])?;
        repo.remote = Some(remote);
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.workdir
    }

    pub fn remote_path(&self) -> Option<&Path> {
        self.remote.as_deref()
    }

    pub fn git(&self) -> GitRepository {
        let timeouts = Timeouts::default();
        GitRepository::new(&self.workdir, "origin", timeouts.network(), timeouts.local())
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.workdir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Run git in the working tree and return trimmed stdout.
    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn remote_has_branch(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{name}");
        let out = self.run_git(&["ls-remote", "--heads", "origin", &refname])?;
        Ok(!out.is_empty())
    }
}
