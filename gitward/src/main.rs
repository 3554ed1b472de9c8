//! `gitward` command line.
//!
//! Every subcommand goes through the same policy-checked paths as the
//! autonomous agent: branch operations through [`BranchManager`], full runs
//! through [`WorkflowEngine`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gitward::branch::BranchManager;
use gitward::core::types::{BranchType, ChangeSet, WorkflowRun, WorkflowState};
use gitward::engine::WorkflowEngine;
use gitward::exit_codes;
use gitward::io::config::{GitwardConfig, Timeouts, config_path, load_config};
use gitward::io::git::{GitRepository, repo_relative_paths};
use gitward::io::hooks::GitHookInstaller;
use gitward::io::pr::GhCliGateway;
use gitward::io::run_store::RunStore;
use gitward::io::time::{Clock, SystemClock};
use gitward::logging;

#[derive(Parser)]
#[command(
    name = "gitward",
    version,
    about = "Branch-safe git workflow automation"
)]
struct Cli {
    /// Repository working tree.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// Config file (default: `<repo>/.gitward.toml`, built-in defaults if absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and check out `<type>/<timestamp>-<slug>` from the base branch.
    CreateBranch {
        #[arg(value_name = "TYPE")]
        branch_type: BranchType,
        description: String,
    },
    /// Stage the given files and commit them, never on a protected branch.
    Commit {
        message: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Push the current branch if the policy allows it.
    Push,
    /// Run the full branch, commit, push and pull request pipeline.
    Process {
        #[arg(value_name = "TYPE")]
        branch_type: BranchType,
        description: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Report the current branch; fails when it is protected.
    Check,
    /// Install the pre-commit, commit-msg and pre-push hooks.
    InstallHooks,
    /// List stored workflow runs.
    Runs,
    /// Continue a stored run from where it stopped.
    Resume { run_id: String },
}

struct Workspace {
    root: PathBuf,
    config: GitwardConfig,
}

impl Workspace {
    fn open(repo: &Path, config: Option<&Path>) -> Result<Self> {
        let timeouts = Timeouts::default();
        let probe = GitRepository::new(repo, "origin", timeouts.network(), timeouts.local());
        let root = probe
            .toplevel()
            .with_context(|| format!("{} is not a git working tree", repo.display()))?;
        let config = load_config(&config_path(&root, config))?;
        Ok(Self { root, config })
    }

    fn git(&self) -> GitRepository {
        GitRepository::new(
            &self.root,
            &self.config.repository.remote,
            self.config.timeouts.network(),
            self.config.timeouts.local(),
        )
    }

    fn branches(&self) -> BranchManager {
        BranchManager::new(
            Arc::new(self.config.policy.clone()),
            self.config.repository.clone(),
            Arc::new(SystemClock),
        )
    }

    fn store(&self) -> Result<RunStore> {
        Ok(RunStore::for_git_dir(&self.git().git_dir()?))
    }

    fn engine(&self) -> Result<WorkflowEngine<GitRepository, GhCliGateway>> {
        let gateway = GhCliGateway::new(&self.root, self.config.timeouts.network());
        Ok(WorkflowEngine::new(self.git(), gateway, &self.config).with_store(self.store()?))
    }

    /// Paths as given on the command line, made relative to the repository root.
    fn relative_paths(&self, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let cwd = std::env::current_dir().context("read current directory")?;
        repo_relative_paths(&self.root, &cwd, files)
    }
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => std::process::exit(usage_error(&err)),
    };
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

/// `--help`/`--version` exit normally; every other parse error, including an
/// unknown branch type, is a command failure.
fn usage_error(err: &clap::Error) -> i32 {
    if !err.use_stderr() {
        err.exit();
    }
    let _ = err.print();
    exit_codes::FAILED
}

fn run(cli: Cli) -> Result<i32> {
    let ws = Workspace::open(&cli.repo, cli.config.as_deref())?;
    match cli.command {
        Command::CreateBranch {
            branch_type,
            description,
        } => cmd_create_branch(&ws, branch_type, &description),
        Command::Commit { message, files } => cmd_commit(&ws, &message, &files),
        Command::Push => cmd_push(&ws),
        Command::Process {
            branch_type,
            description,
            files,
        } => cmd_process(&ws, branch_type, &description, &files),
        Command::Check => cmd_check(&ws),
        Command::InstallHooks => cmd_install_hooks(&ws),
        Command::Runs => cmd_runs(&ws),
        Command::Resume { run_id } => cmd_resume(&ws, &run_id),
    }
}

fn cmd_create_branch(ws: &Workspace, branch_type: BranchType, description: &str) -> Result<i32> {
    let mut git = ws.git();
    let branch = ws
        .branches()
        .create_feature_branch(&mut git, branch_type, description)?;
    println!("{}", branch.name);
    Ok(exit_codes::OK)
}

fn cmd_commit(ws: &Workspace, message: &str, files: &[PathBuf]) -> Result<i32> {
    let files = ws.relative_paths(files)?;
    let mut git = ws.git();
    let commit = ws.branches().safe_commit(&mut git, message, &files)?;
    println!("{commit}");
    Ok(exit_codes::OK)
}

fn cmd_push(ws: &Workspace) -> Result<i32> {
    let mut git = ws.git();
    let branch = ws.branches().safe_push(&mut git)?;
    println!("{branch}");
    Ok(exit_codes::OK)
}

fn cmd_process(
    ws: &Workspace,
    branch_type: BranchType,
    description: &str,
    files: &[PathBuf],
) -> Result<i32> {
    let files = ws.relative_paths(files)?;
    let change_set = ChangeSet::manual(branch_type, description, files, SystemClock.now())?;
    let run = ws.engine()?.process(change_set);
    Ok(report_run(&run))
}

fn cmd_check(ws: &Workspace) -> Result<i32> {
    let git = ws.git();
    let check = ws.branches().check(&git)?;
    if check.protected {
        println!("{}: protected branch", check.branch);
        return Ok(exit_codes::FAILED);
    }
    println!("{}: ok", check.branch);
    Ok(exit_codes::OK)
}

fn cmd_install_hooks(ws: &Workspace) -> Result<i32> {
    let report = GitHookInstaller::new(&ws.config.policy, ws.config.timeouts).install(&ws.root)?;
    for hook in &report.hooks {
        println!("installed {}", hook.display());
    }
    for backup in &report.backed_up {
        println!("backed up {}", backup.display());
    }
    println!("commit template {}", report.commit_template.display());
    Ok(exit_codes::OK)
}

fn cmd_runs(ws: &Workspace) -> Result<i32> {
    for run in ws.store()?.list()? {
        let branch = run.branch.as_ref().map_or("-", |b| b.name.as_str());
        println!("{}\t{}\t{}", run.id, run.state, branch);
    }
    Ok(exit_codes::OK)
}

fn cmd_resume(ws: &Workspace, run_id: &str) -> Result<i32> {
    let engine = ws.engine()?;
    let run = ws.store()?.load(run_id)?;
    let run = engine.resume(run);
    Ok(report_run(&run))
}

fn report_run(run: &WorkflowRun) -> i32 {
    println!("run {}: {}", run.id, run.state);
    if let Some(branch) = &run.branch {
        println!("branch {}", branch.name);
    }
    if let Some(pr) = &run.pr_handle {
        println!("pull request {}", pr.url);
    }
    match run.state {
        WorkflowState::Completed => exit_codes::OK,
        WorkflowState::CompletedWithWarning => {
            eprintln!("warning: pull request not created (see run log)");
            exit_codes::OK
        }
        _ => {
            if let Some(failure) = &run.failure {
                eprintln!(
                    "failed in {} ({}): {}",
                    failure.state,
                    failure.kind.as_str(),
                    failure.message
                );
            }
            exit_codes::FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_process() {
        let cli = Cli::parse_from([
            "gitward",
            "process",
            "feature",
            "add logging",
            "a.py",
            "b.py",
        ]);
        match cli.command {
            Command::Process {
                branch_type,
                description,
                files,
            } => {
                assert_eq!(branch_type, BranchType::Feature);
                assert_eq!(description, "add logging");
                assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("b.py")]);
            }
            _ => panic!("expected process"),
        }
    }

    #[test]
    fn parse_type_aliases_and_global_flags() {
        let cli = Cli::parse_from([
            "gitward",
            "create-branch",
            "documentation",
            "fix readme",
            "--repo",
            "/tmp/r",
        ]);
        assert_eq!(cli.repo, PathBuf::from("/tmp/r"));
        assert!(matches!(
            cli.command,
            Command::CreateBranch {
                branch_type: BranchType::Docs,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_type_and_missing_files() {
        assert!(Cli::try_parse_from(["gitward", "create-branch", "chore", "x"]).is_err());
        assert!(Cli::try_parse_from(["gitward", "commit", "docs: x"]).is_err());
    }
}
