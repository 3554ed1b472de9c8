//! Debounce window and the split of a closed window into change sets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gitward::core::classifier::classify_path;
use gitward::core::errors::WorkflowError;
use gitward::core::types::{BranchType, ChangeOrigin, ChangeSet};
use tokio::time::Instant;

/// Collects changed paths until no new event arrived for a full window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeSet::new(),
            last_event: None,
        }
    }

    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path);
        self.last_event = Some(now);
    }

    pub fn pending(&self) -> &BTreeSet<PathBuf> {
        &self.pending
    }

    /// When the current window closes, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        self.last_event.map(|at| at + self.window)
    }

    /// Close the window, returning its paths.
    pub fn take(&mut self) -> BTreeSet<PathBuf> {
        self.last_event = None;
        std::mem::take(&mut self.pending)
    }
}

/// One change set per inferred type, ordered by type.
pub fn split_window<S: AsRef<str>>(
    paths: BTreeSet<PathBuf>,
    docs_dirs: &[S],
    now: DateTime<Utc>,
) -> Result<Vec<ChangeSet>, WorkflowError> {
    let mut groups: BTreeMap<BranchType, BTreeSet<PathBuf>> = BTreeMap::new();
    for path in paths {
        let branch_type = classify_path(&path, docs_dirs);
        groups.entry(branch_type).or_default().insert(path);
    }
    groups
        .into_iter()
        .map(|(branch_type, files)| {
            let description = describe(branch_type, &files);
            ChangeSet::new(files, &description, branch_type, ChangeOrigin::Watch, now)
        })
        .collect()
}

/// `Update <path>` for one file, `Update <n> <type> files` otherwise.
pub fn describe(branch_type: BranchType, files: &BTreeSet<PathBuf>) -> String {
    match files.iter().next() {
        Some(only) if files.len() == 1 => format!("Update {}", only.display()),
        _ => format!("Update {} {} files", files.len(), branch_type),
    }
}
