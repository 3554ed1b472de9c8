//! `gitward-agent` binary: `monitor` watches the repository, `update` runs one
//! described change through the same queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gitward::core::types::{BranchType, WorkflowRun, WorkflowState};
use gitward::engine::WorkflowEngine;
use gitward::exit_codes;
use gitward::io::config::{GitwardConfig, Timeouts, config_path, load_config};
use gitward::io::git::{GitRepository, repo_relative_paths};
use gitward::io::hooks::GitHookInstaller;
use gitward::io::pr::GhCliGateway;
use gitward::io::run_store::{RunStore, STATE_DIR};
use gitward_agent::AutonomousAgent;
use gitward_agent::fingerprint::{FINGERPRINT_FILE, FingerprintStore};
use gitward_agent::watcher::{POLL_INTERVAL, RepoWatcher};

type Agent = AutonomousAgent<GitRepository, GhCliGateway>;

#[derive(Parser)]
#[command(name = "gitward-agent")]
#[command(about = "Watch a repository and turn changes into reviewed branches")]
struct Args {
    /// Repository working tree.
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,
    /// Config file (default: `<repo>/.gitward.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install hooks, then watch for changes until Ctrl-C.
    Monitor,
    /// Process one described change immediately.
    Update {
        description: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long = "type", value_name = "TYPE", default_value = "feature")]
        branch_type: BranchType,
    },
}

struct AgentSetup {
    root: PathBuf,
    git_dir: PathBuf,
    config: GitwardConfig,
}

impl AgentSetup {
    fn open(repo: &Path, config: Option<&Path>) -> Result<Self> {
        let timeouts = Timeouts::default();
        let probe = GitRepository::new(repo, "origin", timeouts.network(), timeouts.local());
        let root = probe
            .toplevel()
            .with_context(|| format!("{} is not a git working tree", repo.display()))?;
        let git_dir = probe.git_dir()?;
        let config = load_config(&config_path(&root, config))?;
        Ok(Self {
            root,
            git_dir,
            config,
        })
    }

    fn start_agent(&self) -> Agent {
        let git = GitRepository::new(
            &self.root,
            &self.config.repository.remote,
            self.config.timeouts.network(),
            self.config.timeouts.local(),
        );
        let gateway = GhCliGateway::new(&self.root, self.config.timeouts.network());
        let engine = WorkflowEngine::new(git, gateway, &self.config)
            .with_store(RunStore::for_git_dir(&self.git_dir));
        AutonomousAgent::start(Arc::new(engine), self.config.agent.clone())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gitward_agent=info,gitward=info")),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            std::process::exit(exit_codes::FAILED);
        }
    };
    let code = match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FAILED
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    let ctx = AgentSetup::open(&args.repo, args.config.as_deref())?;
    match args.command {
        Command::Monitor => monitor(&ctx).await,
        Command::Update {
            description,
            files,
            branch_type,
        } => update(&ctx, branch_type, &description, files).await,
    }
}

async fn monitor(ctx: &AgentSetup) -> Result<i32> {
    let report = GitHookInstaller::new(&ctx.config.policy, ctx.config.timeouts).install(&ctx.root)?;
    info!(hooks = report.hooks.len(), "hooks installed");

    let agent = ctx.start_agent();
    let (watcher, mut events) =
        RepoWatcher::start(&ctx.root, &ctx.config.agent.watch_dirs, POLL_INTERVAL)?;
    let mut fingerprints =
        FingerprintStore::load(ctx.git_dir.join(STATE_DIR).join(FINGERPRINT_FILE))?;

    let result = agent
        .monitor(watcher.root(), &mut events, &mut fingerprints, shutdown_signal())
        .await;
    info!("stopping");
    drop(watcher);
    if let Err(err) = fingerprints.save() {
        warn!(error = %format!("{err:#}"), "failed to save fingerprints");
    }
    agent.shutdown().await?;
    result?;
    Ok(exit_codes::OK)
}

async fn update(
    ctx: &AgentSetup,
    branch_type: BranchType,
    description: &str,
    files: Vec<PathBuf>,
) -> Result<i32> {
    let cwd = std::env::current_dir().context("read current directory")?;
    let files = repo_relative_paths(&ctx.root, &cwd, &files)?;
    let agent = ctx.start_agent();
    let result = agent.process_manual(branch_type, description, files).await;
    agent.shutdown().await?;
    Ok(report_run(&result?))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for Ctrl-C, running until the watcher stops");
        std::future::pending::<()>().await;
    }
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
        WorkflowState::Completed | WorkflowState::CompletedWithWarning => exit_codes::OK,
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
    fn update_defaults_to_feature() {
        let args = Args::parse_from(["gitward-agent", "update", "add cache", "src/cache.py"]);
        match args.command {
            Command::Update {
                branch_type, files, ..
            } => {
                assert_eq!(branch_type, BranchType::Feature);
                assert_eq!(files, vec![PathBuf::from("src/cache.py")]);
            }
            Command::Monitor => panic!("expected update"),
        }
    }

    #[test]
    fn update_accepts_type_alias() {
        let args = Args::parse_from([
            "gitward-agent",
            "update",
            "--type",
            "documentation",
            "guide",
            "docs/guide.md",
        ]);
        assert!(matches!(
            args.command,
            Command::Update {
                branch_type: BranchType::Docs,
                ..
            }
        ));
        assert!(Args::try_parse_from(["gitward-agent", "update", "no files"]).is_err());
    }
}
