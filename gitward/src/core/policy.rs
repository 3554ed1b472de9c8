//! Branch policy: which names are protected, which are well-formed, and how
//! compliant names are synthesized.
//!
//! A [`Policy`] is loaded once (see [`crate::io::config`]) and shared
//! read-only behind an `Arc` by every component that touches branches.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::PolicyViolation;
use crate::core::types::BranchType;

const MAX_SLUG_LEN: usize = 50;
const EMPTY_SLUG: &str = "change";
const ESCAPE_PREFIX: &str = "work";

static BRANCH_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(feature|docs|fix|config|update)/\d{8}-\d{6}-[a-z0-9-]+$")
        .expect("branch name regex")
});

/// Only strict enforcement exists; unknown levels fail to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enforcement {
    #[default]
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    protected_branches: BTreeSet<String>,
    allowed_prefixes: BTreeSet<BranchType>,
    enforcement: Enforcement,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            protected_branches: ["main", "master"].into_iter().map(String::from).collect(),
            allowed_prefixes: BranchType::ALL.into_iter().collect(),
            enforcement: Enforcement::Strict,
        }
    }
}

impl Policy {
    pub fn new(
        protected_branches: impl IntoIterator<Item = String>,
        allowed_prefixes: impl IntoIterator<Item = BranchType>,
    ) -> Self {
        Self {
            protected_branches: protected_branches.into_iter().collect(),
            allowed_prefixes: allowed_prefixes.into_iter().collect(),
            enforcement: Enforcement::Strict,
        }
    }

    pub fn protected_branches(&self) -> &BTreeSet<String> {
        &self.protected_branches
    }

    pub fn allowed_prefixes(&self) -> &BTreeSet<BranchType> {
        &self.allowed_prefixes
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected_branches.contains(name)
    }

    pub fn allows(&self, branch_type: BranchType) -> bool {
        self.allowed_prefixes.contains(&branch_type)
    }

    /// Protected names fail first; otherwise the segment before the first `/`
    /// must be an allowed type prefix.
    pub fn validate_name(&self, name: &str) -> Result<(), PolicyViolation> {
        if self.is_protected(name) {
            return Err(PolicyViolation::ProtectedBranch {
                name: name.to_string(),
            });
        }
        let prefix_ok = name
            .split_once('/')
            .filter(|(_, rest)| !rest.is_empty())
            .and_then(|(prefix, _)| prefix.parse::<BranchType>().ok())
            .filter(|branch_type| name.starts_with(&format!("{branch_type}/")))
            .is_some_and(|branch_type| self.allows(branch_type));
        if !prefix_ok {
            return Err(PolicyViolation::InvalidPrefix {
                name: name.to_string(),
            });
        }
        Ok(())
    }
}

/// `<type>/<YYYYMMDD>-<HHMMSS>-<slug>`; deterministic for a given `now`.
pub fn generate_name(branch_type: BranchType, description: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}/{}-{}",
        branch_type,
        now.format("%Y%m%d-%H%M%S"),
        slugify(description)
    )
}

/// Escape hatch used when work starts on a protected branch. The `work/`
/// prefix is deliberately not an allowed type, so these branches never push.
pub fn escape_branch_name(now: DateTime<Utc>) -> String {
    format!("{ESCAPE_PREFIX}/{}", now.format("%Y%m%d-%H%M%S"))
}

/// Lowercase; runs of non-alphanumerics collapse to one `-`.
pub fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    for ch in description.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_matches('-').to_string();
    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        slug = slug.trim_end_matches('-').to_string();
    }
    if slug.is_empty() {
        return EMPTY_SLUG.to_string();
    }
    slug
}

/// Full shape check for names produced by [`generate_name`].
pub fn is_generated_name(name: &str) -> bool {
    BRANCH_NAME_RE.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn default_protects_main_and_master_only() {
        let policy = Policy::default();
        assert!(policy.is_protected("main"));
        assert!(policy.is_protected("master"));
        assert!(!policy.is_protected("mainline"));
        assert!(!policy.is_protected("feature/main"));
        assert!(!policy.is_protected("Main"));
    }

    #[test]
    fn validate_name_reports_protected_before_prefix() {
        let policy = Policy::default();
        assert_eq!(
            policy.validate_name("main"),
            Err(PolicyViolation::ProtectedBranch {
                name: "main".to_string()
            })
        );
        assert_eq!(
            policy.validate_name("work/20260102-030405"),
            Err(PolicyViolation::InvalidPrefix {
                name: "work/20260102-030405".to_string()
            })
        );
        assert!(policy.validate_name("docs/20260102-030405-readme").is_ok());
    }

    #[test]
    fn validate_name_rejects_alias_and_missing_prefixes() {
        let policy = Policy::default();
        for name in ["bugfix/x", "feature", "feature/", "FEATURE/x", "/x"] {
            assert!(
                matches!(
                    policy.validate_name(name),
                    Err(PolicyViolation::InvalidPrefix { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn validate_name_honors_restricted_prefixes() {
        let policy = Policy::new(vec!["trunk".to_string()], [BranchType::Docs]);
        assert!(policy.validate_name("docs/x").is_ok());
        assert!(policy.validate_name("feature/x").is_err());
        assert!(policy.validate_name("trunk").is_err());
        assert!(policy.validate_name("main").is_err());
    }

    #[test]
    fn generate_name_is_deterministic_and_well_formed() {
        let name = generate_name(BranchType::Feature, "Add Logging!", at());
        assert_eq!(name, "feature/20260102-030405-add-logging");
        assert_eq!(name, generate_name(BranchType::Feature, "Add Logging!", at()));
        assert!(is_generated_name(&name));
        assert!(Policy::default().validate_name(&name).is_ok());
    }

    #[test]
    fn slugify_collapses_and_caps() {
        assert_eq!(slugify("  Update docs/README.md  "), "update-docs-readme-md");
        assert_eq!(slugify("a -- b"), "a-b");
        assert_eq!(slugify("!!!"), "change");
        assert_eq!(slugify("über cool"), "ber-cool");
        let long = slugify(&"word ".repeat(30));
        assert!(long.len() <= 50);
        assert!(!long.ends_with('-'));
    }

    #[test]
    fn escape_branch_is_not_pushable() {
        let name = escape_branch_name(at());
        assert_eq!(name, "work/20260102-030405");
        assert!(Policy::default().validate_name(&name).is_err());
        assert!(!Policy::default().is_protected(&name));
    }

    #[test]
    fn unknown_enforcement_level_fails_to_parse() {
        let strict: Policy = toml::from_str("enforcement = \"strict\"").expect("strict parses");
        assert_eq!(strict.enforcement(), Enforcement::Strict);
        assert!(toml::from_str::<Policy>("enforcement = \"soft\"").is_err());
    }
}
