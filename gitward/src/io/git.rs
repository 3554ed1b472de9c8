//! Git backend for [`RepositoryHandle`].
//!
//! A small, explicit wrapper around `git` subprocess calls. Network-bound
//! commands (`fetch`, `push`) run under the network timeout; failures are
//! classified into the workflow error taxonomy from stderr.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::errors::{PolicyViolation, WorkflowError};
use crate::core::types::CommitRef;
use crate::io::hooks::PROTECTED_MARKER;
use crate::io::process::{CommandOutput, DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};
use crate::io::repo::RepositoryHandle;

const REJECTION_HINTS: &[&str] = &[
    "[rejected]",
    "[remote rejected]",
    "non-fast-forward",
    "pre-receive hook declined",
    "does not appear to be a git repository",
    "Permission denied",
    "Authentication failed",
    "couldn't find remote ref",
];

const TRANSIENT_HINTS: &[&str] = &[
    "Could not resolve host",
    "Connection timed out",
    "Connection refused",
    "Connection reset",
    "Operation timed out",
    "Temporary failure",
    "unable to access",
    "early EOF",
    "remote end hung up",
    "Could not read from remote repository",
];

const LOCK_HINTS: &[&str] = &["index.lock", "Unable to create", "cannot lock ref"];

#[derive(Debug, Clone)]
pub struct GitRepository {
    workdir: PathBuf,
    remote: String,
    network_timeout: Duration,
    local_timeout: Duration,
}

impl GitRepository {
    pub fn new(
        workdir: impl Into<PathBuf>,
        remote: impl Into<String>,
        network_timeout: Duration,
        local_timeout: Duration,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            remote: remote.into(),
            network_timeout,
            local_timeout,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Absolute path of the `.git` directory (or the worktree's git dir).
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out))
    }

    /// Root of the working tree containing `workdir`.
    pub fn toplevel(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.capture(&["rev-parse", "--show-toplevel"])?))
    }

    /// Directory git reads hooks from, honoring `core.hooksPath`.
    pub fn hooks_dir(&self) -> Result<PathBuf> {
        let out = PathBuf::from(self.capture(&["rev-parse", "--git-path", "hooks"])?);
        if out.is_absolute() {
            return Ok(out);
        }
        Ok(self.workdir.join(out))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.capture(&["config", key, value])?;
        Ok(())
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run(&["diff", "--cached", "--quiet"], self.local_timeout)?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(anyhow!(
                "git diff --cached failed: {}",
                output.stderr_text()
            )),
        }
    }

    pub fn head_sha(&self) -> Result<String> {
        self.capture(&["rev-parse", "HEAD"])
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args, self.local_timeout)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_text()
            ));
        }
        Ok(output.stdout_text())
    }

    /// Run a command whose failures map onto [`WorkflowError`].
    fn exec(&self, args: &[&str], network: bool) -> Result<CommandOutput, WorkflowError> {
        let timeout = if network {
            self.network_timeout
        } else {
            self.local_timeout
        };
        let output = self
            .run(args, timeout)
            .map_err(|err| WorkflowError::Vcs(format!("{err:#}")))?;
        if output.timed_out {
            return Err(WorkflowError::TransientInfra(format!(
                "git {} timed out after {}s",
                args.join(" "),
                timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let command = format!("git {}", args.join(" "));
            let err = classify_git_failure(&command, &output.stderr_text(), network);
            warn!(command = %command, error = %err, "git command failed");
            return Err(err);
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");
        run_command_with_timeout(cmd, timeout, DEFAULT_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("git {}", args.join(" ")))
    }

    fn protected_hook_violation(&self, stderr: &str, branch: Option<&str>) -> Option<WorkflowError> {
        if !stderr.contains(PROTECTED_MARKER) {
            return None;
        }
        let name = match branch {
            Some(name) => name.to_string(),
            None => self.current_branch().unwrap_or_else(|_| "HEAD".to_string()),
        };
        Some(PolicyViolation::ProtectedBranch { name }.into())
    }
}

impl RepositoryHandle for GitRepository {
    #[instrument(skip_all)]
    fn current_branch(&self) -> Result<String, WorkflowError> {
        let out = self.exec(&["rev-parse", "--abbrev-ref", "HEAD"], false)?;
        let name = out.stdout_text();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(WorkflowError::Vcs("detached HEAD (refuse to run)".to_string()));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    #[instrument(skip_all, fields(remote_ref))]
    fn fetch(&mut self, remote_ref: &str) -> Result<(), WorkflowError> {
        match remote_ref.split_once('/') {
            Some((remote, branch)) => self.exec(&["fetch", remote, branch], true)?,
            None => self.exec(&["fetch", remote_ref], true)?,
        };
        Ok(())
    }

    #[instrument(skip_all, fields(name, base_ref))]
    fn create_branch(&mut self, name: &str, base_ref: &str) -> Result<(), WorkflowError> {
        debug!(name, base_ref, "creating branch");
        self.exec(&["branch", name, base_ref], false)?;
        Ok(())
    }

    #[instrument(skip_all, fields(name))]
    fn checkout(&mut self, name: &str) -> Result<(), WorkflowError> {
        debug!(name, "checking out branch");
        self.exec(&["checkout", name], false)?;
        Ok(())
    }

    fn stage(&mut self, paths: &[PathBuf]) -> Result<(), WorkflowError> {
        let path_args: Vec<String> = paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        let mut args = vec!["add", "-A", "--"];
        args.extend(path_args.iter().map(String::as_str));
        self.exec(&args, false)?;
        Ok(())
    }

    #[instrument(skip_all)]
    fn commit(&mut self, message: &str) -> Result<CommitRef, WorkflowError> {
        let staged = self
            .has_staged_changes()
            .map_err(|err| WorkflowError::Vcs(format!("{err:#}")))?;
        if !staged {
            return Err(WorkflowError::Vcs("no staged changes to commit".to_string()));
        }
        if let Err(err) = self.exec(&["commit", "-m", message], false) {
            if let WorkflowError::Vcs(detail) = &err
                && let Some(violation) = self.protected_hook_violation(detail, None)
            {
                return Err(violation);
            }
            return Err(err);
        }
        let sha = self
            .head_sha()
            .map_err(|err| WorkflowError::Vcs(format!("{err:#}")))?;
        debug!(sha = %sha, "committed");
        Ok(CommitRef(sha))
    }

    #[instrument(skip_all, fields(branch))]
    fn push(&mut self, branch: &str) -> Result<(), WorkflowError> {
        let remote = self.remote.clone();
        if let Err(err) = self.exec(&["push", "-u", &remote, branch], true) {
            if let WorkflowError::Rejected(detail) | WorkflowError::Vcs(detail) = &err
                && let Some(violation) = self.protected_hook_violation(detail, Some(branch))
            {
                return Err(violation);
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Map a failed git command onto the error taxonomy.
///
/// Rejections win over transient hints: a refused push would be refused again.
pub fn classify_git_failure(command: &str, stderr: &str, network: bool) -> WorkflowError {
    let detail = format!("{command}: {stderr}");
    if LOCK_HINTS.iter().any(|hint| stderr.contains(hint)) {
        return WorkflowError::TransientInfra(detail);
    }
    if !network {
        return WorkflowError::Vcs(detail);
    }
    if REJECTION_HINTS.iter().any(|hint| stderr.contains(hint)) {
        return WorkflowError::Rejected(detail);
    }
    if TRANSIENT_HINTS.iter().any(|hint| stderr.contains(hint)) {
        return WorkflowError::TransientInfra(detail);
    }
    WorkflowError::Vcs(detail)
}

/// Resolve command-line paths against `cwd` and make them relative to the
/// working tree `root`. Relative paths that resolve outside `root` are kept
/// as given; absolute ones are an error.
pub fn repo_relative_paths(root: &Path, cwd: &Path, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    files
        .iter()
        .map(|file| {
            let joined = cwd.join(file);
            let absolute = std::path::absolute(&joined).unwrap_or(joined);
            match absolute.strip_prefix(root) {
                Ok(rel) => Ok(rel.to_path_buf()),
                Err(_) if file.is_relative() => Ok(file.clone()),
                Err(_) => Err(anyhow!(
                    "{} is outside the repository {}",
                    file.display(),
                    root.display()
                )),
            }
        })
        .collect()
}
