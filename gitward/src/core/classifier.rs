//! Deterministic classification of changed paths.

use std::path::{Component, Path};

use crate::core::types::BranchType;

/// Ignore patterns applied when no configuration overrides them.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git/",
    "target/",
    "__pycache__/",
    "node_modules/",
    ".pyc",
    ".log",
    ".tmp",
    ".swp",
    ".DS_Store",
    ".env",
];

const CONFIG_MARKERS: &[&str] = &[".yaml", ".yml", ".json", ".ini", ".toml"];

/// Infer the change type of one repo-relative path.
///
/// - `docs` if the first component is one of `docs_dirs`, or the name looks like
///   documentation (`readme*`, `license*`, `*.md`).
/// - `config` for config-like names or extensions.
/// - `update` otherwise.
pub fn classify_path<S: AsRef<str>>(path: &Path, docs_dirs: &[S]) -> BranchType {
    if is_under_any(path, docs_dirs) {
        return BranchType::Docs;
    }
    let lowered = path.to_string_lossy().to_lowercase();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if file_name.starts_with("readme") || file_name.starts_with("license") || lowered.ends_with(".md")
    {
        return BranchType::Docs;
    }
    if lowered.contains("config") || CONFIG_MARKERS.iter().any(|ext| lowered.ends_with(ext)) {
        return BranchType::Config;
    }
    BranchType::Update
}

/// True if any ignore pattern occurs in the path. Directory patterns (trailing
/// `/`) only match whole components.
pub fn is_ignored<S: AsRef<str>>(path: &Path, patterns: &[S]) -> bool {
    let text = path.to_string_lossy();
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        match pattern.strip_suffix('/') {
            Some(dir) => path
                .components()
                .any(|c| matches!(c, Component::Normal(name) if name == dir)),
            None => text.contains(pattern),
        }
    })
}

fn is_under_any<S: AsRef<str>>(path: &Path, dirs: &[S]) -> bool {
    let mut components = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir | Component::RootDir));
    match components.next() {
        Some(Component::Normal(first)) => dirs.iter().any(|dir| first == dir.as_ref()),
        _ => false,
    }
}
