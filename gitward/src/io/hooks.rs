//! Git hook installation.
//!
//! The installed hooks repeat the protected-branch rule at the git layer, so
//! it holds even when nobody goes through the workflow engine (a human running
//! raw `git commit` / `git push`). Installing twice overwrites, never appends.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, info, instrument};

use crate::core::message::CONVENTIONAL_PATTERN;
use crate::core::policy::Policy;
use crate::io::config::Timeouts;
use crate::io::git::GitRepository;

/// First-line marker identifying files this module owns.
pub const HOOK_MARKER: &str = "gitward-managed hook v1";
/// Prefix of the message printed by hooks when a protected branch is hit.
pub const PROTECTED_MARKER: &str = "gitward: protected branch";
pub const SECRET_PATTERN: &str = "api_key|password|secret";
pub const COMMIT_TEMPLATE_FILE: &str = ".gitmessage";

const PRE_COMMIT_TEMPLATE: &str = include_str!("templates/pre-commit.sh");
const COMMIT_MSG_TEMPLATE: &str = include_str!("templates/commit-msg.sh");
const PRE_PUSH_TEMPLATE: &str = include_str!("templates/pre-push.sh");
const GITMESSAGE_TEMPLATE: &str = include_str!("templates/gitmessage.txt");

const HOOKS: [(&str, &str); 3] = [
    ("pre-commit", PRE_COMMIT_TEMPLATE),
    ("commit-msg", COMMIT_MSG_TEMPLATE),
    ("pre-push", PRE_PUSH_TEMPLATE),
];

/// What an installation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub hooks: Vec<PathBuf>,
    pub commit_template: PathBuf,
    /// Foreign hooks moved aside as `<name>.pre-gitward`.
    pub backed_up: Vec<PathBuf>,
}

pub struct GitHookInstaller<'a> {
    policy: &'a Policy,
    timeouts: Timeouts,
}

impl<'a> GitHookInstaller<'a> {
    pub fn new(policy: &'a Policy, timeouts: Timeouts) -> Self {
        Self { policy, timeouts }
    }

    #[instrument(skip_all, fields(repo = %repo_root.display()))]
    pub fn install(&self, repo_root: &Path) -> Result<InstallReport> {
        let git = GitRepository::new(
            repo_root,
            "origin",
            self.timeouts.network(),
            self.timeouts.local(),
        );
        let hooks_dir = git.hooks_dir()?;
        fs::create_dir_all(&hooks_dir)
            .with_context(|| format!("create hooks dir {}", hooks_dir.display()))?;

        let mut report = InstallReport::default();
        for (name, template) in HOOKS {
            let rendered = self.render(template)?;
            let path = hooks_dir.join(name);
            if let Some(backup) = back_up_foreign_hook(&path)? {
                report.backed_up.push(backup);
            }
            write_executable(&path, &rendered)?;
            debug!(hook = name, path = %path.display(), "hook written");
            report.hooks.push(path);
        }

        let template_path = repo_root.join(COMMIT_TEMPLATE_FILE);
        let rendered = self.render(GITMESSAGE_TEMPLATE)?;
        fs::write(&template_path, rendered)
            .with_context(|| format!("write {}", template_path.display()))?;
        git.set_config("commit.template", COMMIT_TEMPLATE_FILE)?;
        report.commit_template = template_path;

        info!(
            hooks = report.hooks.len(),
            backed_up = report.backed_up.len(),
            "git hooks installed"
        );
        Ok(report)
    }

    fn render(&self, template: &str) -> Result<String> {
        let env = Environment::new();
        let protected: Vec<&str> = self
            .policy
            .protected_branches()
            .iter()
            .map(String::as_str)
            .collect();
        let types: Vec<&str> = self
            .policy
            .allowed_prefixes()
            .iter()
            .map(|t| t.as_str())
            .collect();
        let mut rendered = env
            .render_str(
                template,
                context! {
                    marker => HOOK_MARKER,
                    protected_marker => PROTECTED_MARKER,
                    protected => protected,
                    secret_pattern => SECRET_PATTERN,
                    conventional_pattern => CONVENTIONAL_PATTERN,
                    types => types.join(", "),
                },
            )
            .context("render hook template")?;
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        Ok(rendered)
    }
}

/// True if `path` holds a file this module generated.
pub fn is_managed(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|contents| contents.lines().take(3).any(|l| l.contains(HOOK_MARKER)))
        .unwrap_or(false)
}

fn back_up_foreign_hook(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() || is_managed(path) {
        return Ok(None);
    }
    let mut backup = path.as_os_str().to_owned();
    backup.push(".pre-gitward");
    let backup = PathBuf::from(backup);
    if backup.exists() {
        return Ok(None);
    }
    fs::rename(path, &backup)
        .with_context(|| format!("back up existing hook {}", path.display()))?;
    Ok(Some(backup))
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write hook {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod hook {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;
    use std::process::Command;

    fn install(repo: &TestRepo) -> InstallReport {
        let policy = Policy::default();
        GitHookInstaller::new(&policy, Timeouts::default())
            .install(repo.path())
            .expect("install hooks")
    }

    fn git(repo: &TestRepo, args: &[&str]) -> std::process::Output {
        Command::new("git")
            .args(args)
            .current_dir(repo.path())
            .output()
            .expect("run git")
    }

    #[test]
    fn install_is_idempotent() {
        let repo = TestRepo::new().expect("repo");
        let first = install(&repo);
        let contents: Vec<String> = first
            .hooks
            .iter()
            .map(|p| fs::read_to_string(p).expect("read hook"))
            .collect();

        let second = install(&repo);
        assert_eq!(first.hooks, second.hooks);
        for (path, before) in second.hooks.iter().zip(&contents) {
            assert_eq!(&fs::read_to_string(path).expect("read hook"), before);
        }
        assert!(second.backed_up.is_empty());
        assert_eq!(
            fs::read_to_string(&second.commit_template)
                .expect("template")
                .matches(HOOK_MARKER)
                .count(),
            1
        );
    }

    #[test]
    fn rendered_hooks_name_every_protected_branch() {
        let repo = TestRepo::new().expect("repo");
        let report = install(&repo);
        let pre_commit = fs::read_to_string(&report.hooks[0]).expect("pre-commit");
        assert!(pre_commit.contains("'main'|'master')"));
        assert!(pre_commit.contains(SECRET_PATTERN));
        let pre_push = fs::read_to_string(&report.hooks[2]).expect("pre-push");
        assert!(pre_push.contains("'main'|'master')"));
    }

    #[test]
    fn configures_commit_template() {
        let repo = TestRepo::new().expect("repo");
        install(&repo);
        let out = git(&repo, &["config", "--get", "commit.template"]);
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), ".gitmessage");
    }

    #[test]
    fn foreign_hook_is_backed_up_once() {
        let repo = TestRepo::new().expect("repo");
        let hooks_dir = repo.path().join(".git/hooks");
        fs::create_dir_all(&hooks_dir).expect("hooks dir");
        fs::write(hooks_dir.join("pre-push"), "#!/bin/sh\nexit 0\n").expect("write");

        let report = install(&repo);
        assert_eq!(report.backed_up, vec![hooks_dir.join("pre-push.pre-gitward")]);
        assert!(is_managed(&hooks_dir.join("pre-push")));
    }

    #[test]
    fn raw_commit_on_protected_branch_is_rejected() {
        let repo = TestRepo::new().expect("repo");
        install(&repo);
        repo.write_file("notes.txt", "hello\n").expect("write");
        assert!(git(&repo, &["add", "notes.txt"]).status.success());

        let out = git(&repo, &["commit", "-m", "docs: notes"]);
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains(PROTECTED_MARKER));
    }

    #[test]
    fn raw_push_to_protected_branch_is_rejected() {
        let repo = TestRepo::with_remote().expect("repo");
        install(&repo);
        let remote_main = || {
            repo.run_git(&["ls-remote", "origin", "refs/heads/main"])
                .expect("ls-remote")
        };
        let before = remote_main();

        repo.write_file("notes.txt", "hello\n").expect("write");
        assert!(git(&repo, &["add", "notes.txt"]).status.success());
        let out = git(&repo, &["commit", "--no-verify", "-m", "docs: notes"]);
        assert!(out.status.success(), "{out:?}");

        let out = git(&repo, &["push", "origin", "main"]);
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains(PROTECTED_MARKER));
        assert_eq!(remote_main(), before);
    }

    #[test]
    fn raw_commit_rejects_secrets_and_bad_messages_on_feature_branch() {
        let repo = TestRepo::new().expect("repo");
        install(&repo);
        assert!(git(&repo, &["checkout", "-b", "feature/x"]).status.success());

        repo.write_file("app.cfg", "API_KEY=abc123\n").expect("write");
        assert!(git(&repo, &["add", "app.cfg"]).status.success());
        let out = git(&repo, &["commit", "-m", "config: add key"]);
        assert!(!out.status.success());
        assert!(String::from_utf8_lossy(&out.stderr).contains("secret"));

        repo.write_file("app.cfg", "timeout=3\n").expect("write");
        assert!(git(&repo, &["add", "app.cfg"]).status.success());
        let out = git(&repo, &["commit", "-m", "tweak things"]);
        assert!(!out.status.success());

        let out = git(&repo, &["commit", "-m", "config: set timeout"]);
        assert!(
            out.status.success(),
            "{}",
            String::from_utf8_lossy(&out.stderr)
        );
    }
}
