//! Workflow state machine: change set to branch, commit, push and pull
//! request.
//!
//! The engine owns the repository handle behind a mutex held for a whole run,
//! so runs against one working tree never interleave. It is also the only
//! place that decides whether a failed step is retried:
//!
//! - policy violations, rejections, validation and local VCS errors fail the
//!   run immediately;
//! - transient infrastructure errors retry the same step with exponential
//!   backoff until `retry.max_attempts` is used up;
//! - missing PR credentials end the run `COMPLETED_WITH_WARNING`.
//!
//! Runs are written to the [`RunStore`] after every transition and attempt.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, info_span, instrument, warn};

use crate::branch::BranchManager;
use crate::core::errors::{PolicyViolation, WorkflowError};
use crate::core::message::{commit_message, pr_body, pr_labels};
use crate::core::policy::Policy;
use crate::core::retry::RetryPolicy;
use crate::core::types::{Branch, ChangeSet, WorkflowRun, WorkflowState};
use crate::io::config::{GitwardConfig, PrConfig};
use crate::io::pr::{PrGateway, PrRequest};
use crate::io::repo::RepositoryHandle;
use crate::io::run_store::RunStore;
use crate::io::time::{Clock, Sleeper, SystemClock, ThreadSleeper};

/// Called with the run after every state change.
pub type Observer = Box<dyn Fn(&WorkflowRun) + Send + Sync>;

/// Cooperative cancellation, checked between steps and after backoff sleeps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WorkflowEngine<R, P> {
    repo: Mutex<R>,
    pr: P,
    branches: BranchManager,
    retry: RetryPolicy,
    pr_config: PrConfig,
    sleeper: Arc<dyn Sleeper>,
    store: Option<RunStore>,
    observer: Option<Observer>,
    cancel: CancelToken,
}

impl<R: RepositoryHandle, P: PrGateway> WorkflowEngine<R, P> {
    pub fn new(repo: R, pr: P, config: &GitwardConfig) -> Self {
        Self {
            repo: Mutex::new(repo),
            pr,
            branches: BranchManager::new(
                Arc::new(config.policy.clone()),
                config.repository.clone(),
                Arc::new(SystemClock),
            ),
            retry: config.retry.clone(),
            pr_config: config.pr.clone(),
            sleeper: Arc::new(ThreadSleeper),
            store: None,
            observer: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.branches = BranchManager::new(
            Arc::clone(self.branches.policy()),
            self.branches.repository().clone(),
            clock,
        );
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_store(mut self, store: RunStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &Policy {
        self.branches.policy()
    }

    pub fn branches(&self) -> &BranchManager {
        &self.branches
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn store(&self) -> Option<&RunStore> {
        self.store.as_ref()
    }

    /// Run `change_set` through the whole pipeline and return the terminal
    /// run. Blocks while another run holds the repository.
    pub fn process(&self, change_set: ChangeSet) -> WorkflowRun {
        let mut run = WorkflowRun::new(change_set, self.now());
        let span = info_span!("workflow_run", run_id = %run.id);
        let _entered = span.enter();
        info!(
            change_set = %run.change_set.id,
            files = run.change_set.files.len(),
            branch_type = %run.change_set.inferred_type,
            "processing change set"
        );

        if let Err(err) = run.change_set.validate() {
            self.fail(&mut run, &err);
            return run;
        }

        let mut repo = self.lock_repo();
        self.persist(&run);
        self.notify(&run);
        self.drive(&mut *repo, &mut run);
        run
    }

    /// Continue a stored run from the state it failed or stopped in.
    /// Terminal successful runs come back unchanged.
    pub fn resume(&self, mut run: WorkflowRun) -> WorkflowRun {
        if matches!(
            run.state,
            WorkflowState::Completed | WorkflowState::CompletedWithWarning
        ) {
            return run;
        }
        let span = info_span!("workflow_run", run_id = %run.id);
        let _entered = span.enter();

        if run.state == WorkflowState::Failed && !run.reopen(self.now()) {
            return run;
        }
        info!(state = %run.state, "resuming run");
        if let Err(err) = run.change_set.validate() {
            self.fail(&mut run, &err);
            return run;
        }

        let mut repo = self.lock_repo();
        if run.state > WorkflowState::Branching
            && let Some(branch) = run.branch.clone()
            && let Err(err) = self.return_to_branch(&mut *repo, &branch)
        {
            self.fail(&mut run, &err);
            return run;
        }
        self.persist(&run);
        self.notify(&run);
        self.drive(&mut *repo, &mut run);
        run
    }

    fn drive(&self, repo: &mut R, run: &mut WorkflowRun) {
        while !run.is_terminal() {
            if self.cancel.is_cancelled() {
                warn!(state = %run.state, "run cancelled");
                self.fail(run, &WorkflowError::Cancelled);
                break;
            }
            let step = match run.state {
                WorkflowState::Detected => Ok(WorkflowState::Branching),
                WorkflowState::Branching => self.branch_step(repo, run),
                WorkflowState::Committing => self.commit_step(repo, run),
                WorkflowState::Pushing => self.push_step(repo, run),
                WorkflowState::PrPending => self.pr_step(run),
                WorkflowState::Completed
                | WorkflowState::CompletedWithWarning
                | WorkflowState::Failed => break,
            };
            match step {
                Ok(next) => self.advance(run, next),
                Err(err) => self.fail(run, &err),
            }
        }
        info!(state = %run.state, "run finished");
    }

    fn branch_step(
        &self,
        repo: &mut R,
        run: &mut WorkflowRun,
    ) -> Result<WorkflowState, WorkflowError> {
        let branch = match &run.branch {
            Some(branch) => branch.clone(),
            None => {
                let cs = &run.change_set;
                let branch = self.branches.plan_branch(cs.inferred_type, &cs.description)?;
                run.branch = Some(branch.clone());
                branch
            }
        };
        self.with_retries(run, || self.branches.open_branch(repo, &branch))?;
        Ok(WorkflowState::Committing)
    }

    fn commit_step(
        &self,
        repo: &mut R,
        run: &mut WorkflowRun,
    ) -> Result<WorkflowState, WorkflowError> {
        if run.commit_ref.is_none() {
            let message = commit_message(run.change_set.inferred_type, &run.change_set.description);
            let files: Vec<PathBuf> = run.change_set.files.iter().cloned().collect();
            let commit =
                self.with_retries(run, || self.branches.safe_commit(repo, &message, &files))?;
            run.note(self.now(), &format!("committed {commit}"));
            run.commit_ref = Some(commit);
            self.persist(run);
        }
        self.guard_before_push(repo)?;
        Ok(WorkflowState::Pushing)
    }

    fn push_step(
        &self,
        repo: &mut R,
        run: &mut WorkflowRun,
    ) -> Result<WorkflowState, WorkflowError> {
        if !run.pushed {
            let pushed = self.with_retries(run, || self.branches.safe_push(repo))?;
            run.pushed = true;
            run.note(self.now(), &format!("pushed {pushed}"));
        }
        Ok(WorkflowState::PrPending)
    }

    fn pr_step(&self, run: &mut WorkflowRun) -> Result<WorkflowState, WorkflowError> {
        let Some(branch) = run.branch.clone() else {
            return Err(WorkflowError::Validation(
                "run reached PR_PENDING without a branch".to_string(),
            ));
        };
        let cs = &run.change_set;
        let request = PrRequest {
            title: commit_message(cs.inferred_type, &cs.description),
            body: pr_body(cs, &branch.name),
            base: self.branches.repository().base_branch.clone(),
            head: branch.name,
            draft: self.pr_config.draft,
        };
        let labels = pr_labels(cs.inferred_type, &self.pr_config.labels);

        let handle = match self.with_retries(run, || self.pr.create_pr(&request)) {
            Ok(handle) => handle,
            Err(WorkflowError::AuthMissing(detail)) => {
                warn!(detail = %detail, "pull request credentials missing");
                run.note(
                    self.now(),
                    &format!("pull request not created, credentials missing: {detail}"),
                );
                return Ok(WorkflowState::CompletedWithWarning);
            }
            Err(err) => return Err(err),
        };
        run.note(self.now(), &format!("opened pull request #{}", handle.number));
        if let Err(err) = self.pr.add_labels(&handle, &labels) {
            warn!(error = %err, "adding labels failed");
            run.note(self.now(), &format!("warning: labels not added: {err}"));
        }
        run.pr_handle = Some(handle);
        Ok(WorkflowState::Completed)
    }

    /// Re-read HEAD right before pushing; a protected branch here means
    /// something moved HEAD after the commit.
    fn guard_before_push(&self, repo: &mut R) -> Result<(), WorkflowError> {
        let current = repo.current_branch()?;
        if self.policy().is_protected(&current) {
            warn!(branch = %current, "protected branch checked out before push");
            return Err(PolicyViolation::ProtectedBranch { name: current }.into());
        }
        Ok(())
    }

    fn return_to_branch(&self, repo: &mut R, branch: &Branch) -> Result<(), WorkflowError> {
        if repo.current_branch()? != branch.name {
            repo.checkout(&branch.name)?;
        }
        Ok(())
    }

    /// Run one step, retrying transient failures within the current state.
    #[instrument(skip_all, fields(state = %run.state))]
    fn with_retries<T>(
        &self,
        run: &mut WorkflowRun,
        mut step: impl FnMut() -> Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        loop {
            let attempt = run.record_attempt(self.now());
            self.persist(run);
            let err = match step() {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() || !self.retry.allows_another(attempt) {
                if err.is_retryable() {
                    warn!(attempt, error = %err, "retries exhausted");
                }
                return Err(err);
            }
            let delay = self.retry.backoff_after(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "transient failure, retrying");
            run.note(
                self.now(),
                &format!(
                    "attempt {attempt} failed: {err}; retrying in {}ms",
                    delay.as_millis()
                ),
            );
            self.persist(run);
            self.sleeper.sleep(delay);
            if self.cancel.is_cancelled() {
                return Err(WorkflowError::Cancelled);
            }
        }
    }

    fn advance(&self, run: &mut WorkflowRun, next: WorkflowState) {
        if run.transition(next, self.now()) {
            info!(state = %next, "transition");
            self.persist(run);
            self.notify(run);
        }
    }

    fn fail(&self, run: &mut WorkflowRun, err: &WorkflowError) {
        warn!(state = %run.state, kind = err.kind().as_str(), error = %err, "run failed");
        run.fail(err, self.now());
        self.persist(run);
        self.notify(run);
    }

    fn persist(&self, run: &WorkflowRun) {
        if let Some(store) = &self.store
            && let Err(err) = store.save(run)
        {
            warn!(error = %format!("{err:#}"), "failed to write run record");
        }
    }

    fn notify(&self, run: &WorkflowRun) {
        if let Some(observer) = &self.observer {
            observer(run);
        }
    }

    fn lock_repo(&self) -> MutexGuard<'_, R> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.branches.clock().now()
    }
}
