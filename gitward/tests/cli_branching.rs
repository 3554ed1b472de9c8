//! CLI tests for the branch commands.
//!
//! Spawns the gitward binary against temp repositories and checks exit codes
//! and the resulting repository state.

use std::process::{Command, Output};

use gitward::exit_codes;
use gitward::test_support::TestRepo;

fn gitward(repo: &TestRepo, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gitward"))
        .current_dir(repo.path())
        .args(args)
        .output()
        .expect("run gitward")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn check_fails_on_protected_branch() {
    let repo = TestRepo::new().expect("repo");
    let out = gitward(&repo, &["check"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
    assert_eq!(stdout(&out), "main: protected branch");
}

#[test]
fn create_branch_then_check_passes() {
    let repo = TestRepo::with_remote().expect("repo");
    let out = gitward(&repo, &["create-branch", "docs", "Fix the README"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    let name = stdout(&out);
    assert!(name.starts_with("docs/"));
    assert!(name.ends_with("-fix-the-readme"));
    assert_eq!(
        repo.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).expect("head"),
        name
    );

    let out = gitward(&repo, &["check"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
}

#[test]
fn create_branch_rejects_unknown_type() {
    let repo = TestRepo::new().expect("repo");
    let out = gitward(&repo, &["create-branch", "chore", "x"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown branch type"));
    assert_eq!(
        repo.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).expect("head"),
        "main"
    );

    let out = gitward(&repo, &["process", "chore", "x", "README.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
}

#[test]
fn help_exits_cleanly() {
    let repo = TestRepo::new().expect("repo");
    let out = gitward(&repo, &["--help"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(stdout(&out).contains("create-branch"));
}

#[test]
fn push_from_protected_branch_is_refused_without_touching_remote() {
    let repo = TestRepo::with_remote().expect("repo");
    repo.write_file("notes.txt", "local only\n").expect("write");
    repo.run_git(&["add", "notes.txt"]).expect("add");
    repo.run_git(&["commit", "-q", "-m", "docs: local"]).expect("commit");
    let local = repo.run_git(&["rev-parse", "main"]).expect("local main");

    let out = gitward(&repo, &["push"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&out.stderr).contains("protected branch 'main'"));
    let remote = repo
        .run_git(&["ls-remote", "origin", "refs/heads/main"])
        .expect("ls-remote");
    assert!(!remote.starts_with(&local));
}

#[test]
fn commit_on_protected_branch_moves_to_escape_branch() {
    let repo = TestRepo::new().expect("repo");
    let main_before = repo.run_git(&["rev-parse", "main"]).expect("main");
    repo.write_file("docs/guide.md", "# guide\n").expect("write");

    let out = gitward(&repo, &["commit", "docs: add guide", "docs/guide.md"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");

    let head = repo
        .run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
        .expect("head");
    assert!(head.starts_with("work/"));
    assert_eq!(repo.run_git(&["rev-parse", "main"]).expect("main"), main_before);

    // Escape branches carry no type prefix, so they never leave the machine.
    let out = gitward(&repo, &["push"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
}

#[test]
fn install_hooks_reports_files() {
    let repo = TestRepo::new().expect("repo");
    let out = gitward(&repo, &["install-hooks"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    let text = stdout(&out);
    assert!(text.contains("pre-commit"));
    assert!(text.contains("commit-msg"));
    assert!(text.contains("pre-push"));
    assert!(repo.path().join(".gitmessage").exists());
}

#[test]
fn invalid_config_is_reported() {
    let repo = TestRepo::new().expect("repo");
    repo.write_file(".gitward.toml", "[policy]\nenforcement = \"soft\"\n")
        .expect("write config");
    let out = gitward(&repo, &["check"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
    assert!(String::from_utf8_lossy(&out.stderr).contains(".gitward.toml"));
}
