//! Capability interface over version-control primitives.
//!
//! [`crate::io::git::GitRepository`] is the production backend; tests use
//! `test_support::FakeRepository`. Mutating operations take `&mut self`: a
//! handle stands for exclusive ownership of one working tree.

use std::path::PathBuf;

use crate::core::errors::WorkflowError;
use crate::core::types::CommitRef;

pub trait RepositoryHandle {
    /// Current branch name; detached HEAD is an error.
    fn current_branch(&self) -> Result<String, WorkflowError>;

    /// Fetch `remote_ref` (`<remote>/<branch>`). Network bound.
    fn fetch(&mut self, remote_ref: &str) -> Result<(), WorkflowError>;

    fn create_branch(&mut self, name: &str, base_ref: &str) -> Result<(), WorkflowError>;

    fn checkout(&mut self, name: &str) -> Result<(), WorkflowError>;

    /// Stage the given repo-relative paths, including deletions.
    fn stage(&mut self, paths: &[PathBuf]) -> Result<(), WorkflowError>;

    /// Commit what is staged. Fails when nothing is staged.
    fn commit(&mut self, message: &str) -> Result<CommitRef, WorkflowError>;

    /// Push `branch` to the configured remote. Network bound.
    fn push(&mut self, branch: &str) -> Result<(), WorkflowError>;
}
