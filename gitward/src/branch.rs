//! Branch lifecycle guarded by the branch policy.
//!
//! Every mutating call re-reads the current branch through the
//! [`RepositoryHandle`] instead of trusting earlier state, so a branch switch
//! behind our back is caught before anything lands on a protected branch.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::core::errors::{PolicyViolation, WorkflowError};
use crate::core::policy::{Policy, escape_branch_name, generate_name};
use crate::core::types::{Branch, BranchType, CommitRef};
use crate::io::config::RepositoryConfig;
use crate::io::repo::RepositoryHandle;
use crate::io::time::Clock;

/// Result of [`BranchManager::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCheck {
    pub branch: String,
    pub protected: bool,
}

pub struct BranchManager {
    policy: Arc<Policy>,
    repository: RepositoryConfig,
    clock: Arc<dyn Clock>,
}

impl BranchManager {
    pub fn new(policy: Arc<Policy>, repository: RepositoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            repository,
            clock,
        }
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repository
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Leave a protected branch for a fresh `work/<timestamp>` branch.
    ///
    /// Returns the escape branch name when one was created; a no-op (no
    /// mutation) when the current branch is not protected.
    #[instrument(skip_all)]
    pub fn ensure_safe_branch<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &mut R,
    ) -> Result<Option<String>, WorkflowError> {
        let current = repo.current_branch()?;
        if !self.policy.is_protected(&current) {
            return Ok(None);
        }
        let escape = escape_branch_name(self.clock.now());
        warn!(from = %current, to = %escape, "on protected branch, switching to escape branch");
        repo.create_branch(&escape, &current)?;
        repo.checkout(&escape)?;
        Ok(Some(escape))
    }

    /// Name and validate a branch for `branch_type` without touching the
    /// repository.
    pub fn plan_branch(
        &self,
        branch_type: BranchType,
        description: &str,
    ) -> Result<Branch, WorkflowError> {
        if description.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "branch description is empty".to_string(),
            ));
        }
        let created_at = self.clock.now();
        let name = generate_name(branch_type, description, created_at);
        self.policy.validate_name(&name)?;
        Ok(Branch {
            name,
            branch_type,
            description: description.trim().to_string(),
            created_at,
            base_ref: self.repository.base_ref(),
        })
    }

    /// Fetch the base, create `branch` from it and check it out.
    ///
    /// Safe to call again after a partial failure: an existing branch of the
    /// same name is reused and being on it already is success.
    #[instrument(skip_all, fields(branch = %branch.name))]
    pub fn open_branch<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &mut R,
        branch: &Branch,
    ) -> Result<(), WorkflowError> {
        if repo.current_branch()? == branch.name {
            debug!("already on branch");
            return Ok(());
        }
        repo.fetch(&branch.base_ref)?;
        match repo.create_branch(&branch.name, &branch.base_ref) {
            Ok(()) => {}
            Err(WorkflowError::Vcs(detail)) if detail.contains("already exists") => {
                debug!("branch exists, reusing");
            }
            Err(err) => return Err(err),
        }
        repo.checkout(&branch.name)?;
        info!(base = %branch.base_ref, "branch created");
        Ok(())
    }

    pub fn create_feature_branch<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &mut R,
        branch_type: BranchType,
        description: &str,
    ) -> Result<Branch, WorkflowError> {
        let branch = self.plan_branch(branch_type, description)?;
        self.open_branch(repo, &branch)?;
        Ok(branch)
    }

    /// Stage `files` and commit them, never on a protected branch.
    #[instrument(skip_all, fields(files = files.len()))]
    pub fn safe_commit<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &mut R,
        message: &str,
        files: &[PathBuf],
    ) -> Result<CommitRef, WorkflowError> {
        if files.is_empty() {
            return Err(WorkflowError::Validation("no files to commit".to_string()));
        }
        if message.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "commit message is empty".to_string(),
            ));
        }
        self.ensure_safe_branch(repo)?;
        let current = repo.current_branch()?;
        if self.policy.is_protected(&current) {
            return Err(PolicyViolation::ProtectedBranch { name: current }.into());
        }
        repo.stage(files)?;
        let commit = repo.commit(message)?;
        info!(branch = %current, commit = %commit, "committed");
        Ok(commit)
    }

    /// Push the current branch. Protected or malformed names are refused
    /// before any network call. Returns the pushed branch name.
    #[instrument(skip_all)]
    pub fn safe_push<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &mut R,
    ) -> Result<String, WorkflowError> {
        let current = repo.current_branch()?;
        self.policy.validate_name(&current)?;
        repo.push(&current)?;
        info!(branch = %current, remote = %self.repository.remote, "pushed");
        Ok(current)
    }

    pub fn check<R: RepositoryHandle + ?Sized>(
        &self,
        repo: &R,
    ) -> Result<BranchCheck, WorkflowError> {
        let branch = repo.current_branch()?;
        let protected = self.policy.is_protected(&branch);
        Ok(BranchCheck { branch, protected })
    }
}
