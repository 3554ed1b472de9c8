//! Pull request gateway.
//!
//! The production backend shells out to the GitHub CLI (`gh`). Credentials
//! come from `GH_TOKEN`/`GITHUB_TOKEN` or an existing `gh auth login`; with
//! neither, every call reports [`WorkflowError::AuthMissing`], which the
//! engine treats as a warning rather than a failure.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::errors::WorkflowError;
use crate::core::types::PrHandle;
use crate::io::process::{
    CommandOutput, DEFAULT_OUTPUT_LIMIT_BYTES, is_not_found, run_command_with_timeout,
};

const TOKEN_VARS: [&str; 2] = ["GH_TOKEN", "GITHUB_TOKEN"];

const AUTH_HINTS: &[&str] = &[
    "gh auth login",
    "not logged in",
    "authentication",
    "HTTP 401",
    "Bad credentials",
];

const TRANSIENT_HINTS: &[&str] = &[
    "timeout",
    "timed out",
    "could not resolve",
    "connection refused",
    "connection reset",
    "HTTP 502",
    "HTTP 503",
    "HTTP 504",
    "rate limit",
];

static PR_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+/pull/(\d+)").expect("pull request url regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub draft: bool,
}

pub trait PrGateway {
    fn create_pr(&self, request: &PrRequest) -> Result<PrHandle, WorkflowError>;

    /// Best effort; callers log failures and carry on.
    fn add_labels(&self, pr: &PrHandle, labels: &[String]) -> Result<(), WorkflowError>;
}

/// [`PrGateway`] backed by the `gh` binary.
#[derive(Debug, Clone)]
pub struct GhCliGateway {
    workdir: PathBuf,
    program: PathBuf,
    timeout: Duration,
    token: Option<String>,
}

impl GhCliGateway {
    /// Picks up a token from the environment, if any.
    pub fn new(workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let token = TOKEN_VARS
            .iter()
            .filter_map(|var| env::var(var).ok())
            .find(|value| !value.trim().is_empty());
        Self {
            workdir: workdir.into(),
            program: PathBuf::from("gh"),
            timeout,
            token,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn ensure_auth(&self) -> Result<(), WorkflowError> {
        if self.token.is_some() {
            return Ok(());
        }
        let output = self.run(&["auth", "status"])?;
        if output.timed_out {
            return Err(WorkflowError::TransientInfra(
                "gh auth status timed out".to_string(),
            ));
        }
        if !output.success() {
            return Err(WorkflowError::AuthMissing(format!(
                "no GH_TOKEN/GITHUB_TOKEN and gh is not logged in: {}",
                output.stderr_text()
            )));
        }
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput, WorkflowError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("GH_PROMPT_DISABLED", "1");
        if let Some(token) = &self.token {
            cmd.env("GH_TOKEN", token);
        }
        run_command_with_timeout(cmd, self.timeout, DEFAULT_OUTPUT_LIMIT_BYTES).map_err(|err| {
            if is_not_found(&err) {
                WorkflowError::AuthMissing(format!(
                    "{} is not installed",
                    self.program.display()
                ))
            } else {
                WorkflowError::TransientInfra(format!("{err:#}"))
            }
        })
    }

    fn exec(&self, args: &[&str]) -> Result<CommandOutput, WorkflowError> {
        let output = self.run(args)?;
        if output.timed_out {
            return Err(WorkflowError::TransientInfra(format!(
                "gh {} timed out after {}s",
                args.first().copied().unwrap_or_default(),
                self.timeout.as_secs()
            )));
        }
        if !output.success() {
            let err = classify_gh_failure(&output.stderr_text());
            warn!(error = %err, "gh command failed");
            return Err(err);
        }
        Ok(output)
    }
}

impl PrGateway for GhCliGateway {
    #[instrument(skip_all, fields(head = %request.head, base = %request.base))]
    fn create_pr(&self, request: &PrRequest) -> Result<PrHandle, WorkflowError> {
        self.ensure_auth()?;
        let mut args = vec![
            "pr",
            "create",
            "--title",
            request.title.as_str(),
            "--body",
            request.body.as_str(),
            "--base",
            request.base.as_str(),
            "--head",
            request.head.as_str(),
        ];
        if request.draft {
            args.push("--draft");
        }
        let stdout = match self.exec(&args) {
            Ok(output) => output.stdout_text(),
            // A retry after a timed-out create finds the first attempt's PR.
            Err(WorkflowError::Rejected(detail)) if detail.contains("already exists") => {
                let Some(handle) = parse_pr_handle(&detail) else {
                    return Err(WorkflowError::Rejected(detail));
                };
                info!(url = %handle.url, number = handle.number, "pull request already exists");
                return Ok(handle);
            }
            Err(err) => return Err(err),
        };
        let handle = parse_pr_handle(&stdout).ok_or_else(|| {
            WorkflowError::Rejected(format!("gh pr create printed no pull request url: {stdout}"))
        })?;
        info!(url = %handle.url, number = handle.number, "pull request created");
        Ok(handle)
    }

    #[instrument(skip_all, fields(number = pr.number))]
    fn add_labels(&self, pr: &PrHandle, labels: &[String]) -> Result<(), WorkflowError> {
        if labels.is_empty() {
            return Ok(());
        }
        let number = pr.number.to_string();
        let joined = labels.join(",");
        self.exec(&["pr", "edit", number.as_str(), "--add-label", joined.as_str()])?;
        debug!(labels = %joined, "labels added");
        Ok(())
    }
}

/// Last pull request URL in `gh` output, with its number.
pub fn parse_pr_handle(stdout: &str) -> Option<PrHandle> {
    let captures = PR_URL_RE.captures_iter(stdout).last()?;
    let url = captures.get(0)?.as_str().to_string();
    let number = captures.get(1)?.as_str().parse().ok()?;
    Some(PrHandle { url, number })
}

/// Map `gh` stderr onto the error taxonomy. Anything unrecognized is a
/// rejection: repeating the same request would fail the same way.
pub fn classify_gh_failure(stderr: &str) -> WorkflowError {
    let lowered = stderr.to_lowercase();
    if AUTH_HINTS
        .iter()
        .any(|hint| lowered.contains(&hint.to_lowercase()))
    {
        return WorkflowError::AuthMissing(stderr.to_string());
    }
    if TRANSIENT_HINTS
        .iter()
        .any(|hint| lowered.contains(&hint.to_lowercase()))
    {
        return WorkflowError::TransientInfra(stderr.to_string());
    }
    WorkflowError::Rejected(stderr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn request() -> PrRequest {
        PrRequest {
            title: "feature: add logging".to_string(),
            body: "## Summary\nadd logging\n".to_string(),
            base: "main".to_string(),
            head: "feature/20260101-000000-add-logging".to_string(),
            draft: false,
        }
    }

    const PR_CREATED: &str = "echo 'Creating pull request'; echo 'https://github.com/o/r/pull/42'";
    const PR_EXISTS: &str = "echo 'a pull request for branch \"feature/x\" into branch \"main\" already exists:' >&2; \
                             echo 'https://github.com/o/r/pull/41' >&2; exit 1";

    fn fake_gh(dir: &Path, auth_exit: i32) -> PathBuf {
        fake_gh_script(dir, auth_exit, PR_CREATED)
    }

    fn fake_gh_script(dir: &Path, auth_exit: i32, pr_create: &str) -> PathBuf {
        let path = dir.join("gh");
        let script = format!(
            "#!/bin/sh\n\
             case \"$1 $2\" in\n\
             \"auth status\") exit {auth_exit} ;;\n\
             \"pr create\") {pr_create} ;;\n\
             \"pr edit\") echo \"$@\" > \"$(dirname \"$0\")/edit-args\" ;;\n\
             *) echo \"unexpected $*\" >&2; exit 2 ;;\n\
             esac\n"
        );
        fs::write(&path, script).expect("write fake gh");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        path
    }

    #[test]
    fn parses_number_from_last_url() {
        let handle = parse_pr_handle("Creating...\nhttps://github.com/o/r/pull/17\n")
            .expect("handle");
        assert_eq!(handle.number, 17);
        assert_eq!(handle.url, "https://github.com/o/r/pull/17");
        assert!(parse_pr_handle("no url here").is_none());
    }

    #[test]
    fn classifies_gh_stderr() {
        assert!(matches!(
            classify_gh_failure("To get started with GitHub CLI, please run:  gh auth login"),
            WorkflowError::AuthMissing(_)
        ));
        assert!(matches!(
            classify_gh_failure("HTTP 503: Service Unavailable"),
            WorkflowError::TransientInfra(_)
        ));
        assert!(matches!(
            classify_gh_failure("a pull request for branch \"x\" already exists"),
            WorkflowError::Rejected(_)
        ));
    }

    #[test]
    fn missing_binary_is_auth_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = GhCliGateway::new(temp.path(), Duration::from_secs(5))
            .with_program(temp.path().join("no-such-gh"))
            .with_token(None);
        let err = gateway.create_pr(&request()).unwrap_err();
        assert!(matches!(err, WorkflowError::AuthMissing(_)));
    }

    #[test]
    fn logged_out_cli_is_auth_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = GhCliGateway::new(temp.path(), Duration::from_secs(5))
            .with_program(fake_gh(temp.path(), 1))
            .with_token(None);
        let err = gateway.create_pr(&request()).unwrap_err();
        assert!(matches!(err, WorkflowError::AuthMissing(_)));
    }

    #[test]
    fn creates_pr_and_adds_labels_through_cli() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = GhCliGateway::new(temp.path(), Duration::from_secs(5))
            .with_program(fake_gh(temp.path(), 0))
            .with_token(None);
        let handle = gateway.create_pr(&request()).expect("create");
        assert_eq!(handle.number, 42);

        gateway
            .add_labels(&handle, &["feature".to_string(), "automated".to_string()])
            .expect("labels");
        let args = fs::read_to_string(temp.path().join("edit-args")).expect("edit args");
        assert_eq!(args.trim(), "pr edit 42 --add-label feature,automated");
    }

    #[test]
    fn existing_pull_request_for_branch_is_reused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let gateway = GhCliGateway::new(temp.path(), Duration::from_secs(5))
            .with_program(fake_gh_script(temp.path(), 0, PR_EXISTS))
            .with_token(None);
        let handle = gateway.create_pr(&request()).expect("existing pr");
        assert_eq!(handle.number, 41);
        assert_eq!(handle.url, "https://github.com/o/r/pull/41");
    }
}
