//! `gitward-agent update` against a real repository with a bare remote.
//!
//! `gh` is pointed at an empty config dir with no token, so the pull request
//! step always reports missing auth and the run ends with a warning.

use std::process::{Command, Output};

use gitward::exit_codes;
use gitward::test_support::TestRepo;

fn agent(repo: &TestRepo, gh_config: &std::path::Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gitward-agent"))
        .current_dir(repo.path())
        .args(args)
        .env("GH_CONFIG_DIR", gh_config)
        .env("GH_TOKEN", "")
        .env("GITHUB_TOKEN", "")
        .env("RUST_LOG", "off")
        .output()
        .expect("run gitward-agent")
}

#[test]
fn update_pushes_a_typed_branch_and_leaves_main_alone() {
    let repo = TestRepo::with_remote().expect("repo");
    let gh_config = tempfile::tempdir().expect("gh config");
    let main_before = repo.run_git(&["rev-parse", "main"]).expect("main");
    repo.write_file("docs/guide.md", "# Guide\n").expect("write");

    let out = agent(
        &repo,
        gh_config.path(),
        &["update", "--type", "docs", "Add guide", "docs/guide.md"],
    );
    assert_eq!(out.status.code(), Some(exit_codes::OK), "{out:?}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("COMPLETED_WITH_WARNING"), "{stdout}");

    let branch = repo
        .run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
        .expect("head");
    assert!(branch.starts_with("docs/"), "{branch}");
    assert!(branch.ends_with("-add-guide"), "{branch}");
    assert!(repo.remote_has_branch(&branch).expect("remote"));
    assert_eq!(repo.run_git(&["rev-parse", "main"]).expect("main"), main_before);
    assert_eq!(
        repo.run_git(&["log", "-1", "--format=%s"]).expect("log"),
        "docs: Add guide"
    );
}

#[test]
fn update_without_files_fails() {
    let repo = TestRepo::new().expect("repo");
    let gh_config = tempfile::tempdir().expect("gh config");
    let out = agent(&repo, gh_config.path(), &["update", "nothing"]);
    assert_eq!(out.status.code(), Some(exit_codes::FAILED));
}
