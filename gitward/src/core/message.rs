//! Commit message and pull request text for a change set.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{BranchType, ChangeSet};

/// Conventional commit shape. Written in the subset shared by POSIX ERE and
/// the `regex` crate so the commit-msg hook can embed it verbatim.
pub const CONVENTIONAL_PATTERN: &str = r"^(feat|feature|fix|docs|style|refactor|perf|test|build|ci|chore|revert|config|update)(\([A-Za-z0-9_./-]+\))?!?: [^[:space:]].*$";

pub const AUTOMATED_LABEL: &str = "automated";

static CONVENTIONAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CONVENTIONAL_PATTERN).expect("conventional commit regex"));

/// `<type>: <description>`.
pub fn commit_message(branch_type: BranchType, description: &str) -> String {
    format!("{branch_type}: {}", description.trim())
}

/// True if the first line of `message` has the shape `type(scope)?: subject`.
pub fn is_conventional(message: &str) -> bool {
    message
        .lines()
        .next()
        .is_some_and(|line| CONVENTIONAL_RE.is_match(line.trim_end()))
}

/// Scope label derived from the affected paths.
pub fn scope_for<P: AsRef<Path>>(files: &[P]) -> &'static str {
    let lowered: Vec<String> = files
        .iter()
        .map(|p| p.as_ref().to_string_lossy().to_lowercase())
        .collect();
    if lowered.iter().any(|f| f.contains("doc")) {
        "docs"
    } else if lowered
        .iter()
        .any(|f| f.contains("config") || f.ends_with(".yaml") || f.ends_with(".json"))
    {
        "config"
    } else if lowered
        .iter()
        .any(|f| f.contains("script") || f.ends_with(".sh") || f.ends_with(".py"))
    {
        "scripts"
    } else {
        "core"
    }
}

/// `[<type>, "automated"]` followed by configured labels, without duplicates.
pub fn pr_labels(branch_type: BranchType, configured: &[String]) -> Vec<String> {
    let mut labels = vec![branch_type.to_string(), AUTOMATED_LABEL.to_string()];
    for label in configured {
        let label = label.trim();
        if !label.is_empty() && !labels.iter().any(|l| l == label) {
            labels.push(label.to_string());
        }
    }
    labels
}

/// Markdown body for the pull request opened for `change_set` on `branch`.
pub fn pr_body(change_set: &ChangeSet, branch: &str) -> String {
    let files: Vec<&PathBuf> = change_set.files.iter().collect();
    let mut body = String::new();
    body.push_str("## Summary\n");
    body.push_str(change_set.description.trim());
    body.push_str("\n\n## Type of Change\n");
    body.push_str(&format!("- Type: {}\n", change_set.inferred_type));
    body.push_str(&format!("- Scope: {}\n", scope_for(&files)));
    body.push_str(&format!("- Branch: {branch}\n"));
    body.push_str("\n## Files Changed\n");
    for file in &files {
        body.push_str(&format!("- {}\n", file.display()));
    }
    body.push_str(
        "\n## Checklist\n\
         - [x] Changes follow branch-based workflow\n\
         - [x] Commits follow conventional format\n\
         - [x] No direct commits to a protected branch\n\
         - [ ] Tests pass (if applicable)\n\
         - [ ] Documentation updated (if needed)\n",
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn commit_message_uses_type_and_description() {
        assert_eq!(
            commit_message(BranchType::Feature, " add logging "),
            "feature: add logging"
        );
    }

    #[test]
    fn conventional_shape() {
        assert!(is_conventional("feature: add logging"));
        assert!(is_conventional("fix(parser): handle eof\n\nbody text"));
        assert!(is_conventional("feat!: breaking"));
        assert!(!is_conventional("add logging"));
        assert!(!is_conventional("feature:missing space"));
        assert!(!is_conventional("wip: stuff"));
        assert!(!is_conventional(""));
    }

    #[test]
    fn scope_prefers_docs_then_config_then_scripts() {
        assert_eq!(scope_for(&["docs/a.md", "x.json"]), "docs");
        assert_eq!(scope_for(&["settings.yaml"]), "config");
        assert_eq!(scope_for(&["tools/run.sh"]), "scripts");
        assert_eq!(scope_for(&["src/lib.rs"]), "core");
    }

    #[test]
    fn labels_start_with_type_and_skip_duplicates() {
        let configured = vec!["automated".to_string(), "bot".to_string(), " ".to_string()];
        assert_eq!(
            pr_labels(BranchType::Docs, &configured),
            vec!["docs", "automated", "bot"]
        );
    }

    #[test]
    fn pr_body_lists_files_and_branch() {
        let cs = ChangeSet::manual(
            BranchType::Feature,
            "add logging",
            [PathBuf::from("a.py"), PathBuf::from("b.py")],
            Utc::now(),
        )
        .expect("change set");
        let body = pr_body(&cs, "feature/20260101-000000-add-logging");
        assert!(body.starts_with("## Summary\nadd logging\n"));
        assert!(body.contains("- a.py\n- b.py\n"));
        assert!(body.contains("- Scope: scripts\n"));
        assert!(body.contains("- Branch: feature/20260101-000000-add-logging\n"));
    }
}
