//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the branch manager, the
//! workflow engine and the agent. They are serialized into run records, so
//! field names and enum spellings must stay stable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{ErrorKind, WorkflowError};

/// Branch type prefix, also used as the conventional commit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
    Feature,
    Docs,
    Fix,
    Config,
    Update,
}

impl BranchType {
    pub const ALL: [BranchType; 5] = [
        BranchType::Feature,
        BranchType::Docs,
        BranchType::Fix,
        BranchType::Config,
        BranchType::Update,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BranchType::Feature => "feature",
            BranchType::Docs => "docs",
            BranchType::Fix => "fix",
            BranchType::Config => "config",
            BranchType::Update => "update",
        }
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BranchType {
    type Err = WorkflowError;

    /// Accepts the short prefixes plus the long update-type names
    /// (`documentation`, `bugfix`, `configuration`, `maintenance`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feature" => Ok(BranchType::Feature),
            "docs" | "documentation" => Ok(BranchType::Docs),
            "fix" | "bugfix" => Ok(BranchType::Fix),
            "config" | "configuration" => Ok(BranchType::Config),
            "update" | "maintenance" => Ok(BranchType::Update),
            other => Err(WorkflowError::Validation(format!(
                "unknown branch type '{other}' (expected one of feature, docs, fix, config, update)"
            ))),
        }
    }
}

/// A branch created by the branch manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub branch_type: BranchType,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub base_ref: String,
}

/// Commit id as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitRef(pub String);

impl fmt::Display for CommitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrHandle {
    pub url: String,
    pub number: u64,
}

/// Where a change set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Watch,
    Manual,
}

/// A debounced group of file changes awaiting processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Content-derived key; identical change sets share an id.
    pub id: String,
    pub files: BTreeSet<PathBuf>,
    pub description: String,
    pub inferred_type: BranchType,
    pub detected_at: DateTime<Utc>,
    pub origin: ChangeOrigin,
}

impl ChangeSet {
    /// Build a validated change set. Empty file lists and blank descriptions
    /// are rejected here, before anything touches the repository.
    pub fn new(
        files: impl IntoIterator<Item = PathBuf>,
        description: &str,
        inferred_type: BranchType,
        origin: ChangeOrigin,
        detected_at: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        let files: BTreeSet<PathBuf> = files.into_iter().collect();
        let description = description.trim().to_string();
        let id = change_set_id(inferred_type, &description, &files);
        let change_set = Self {
            id,
            files,
            description,
            inferred_type,
            detected_at,
            origin,
        };
        change_set.validate()?;
        Ok(change_set)
    }

    /// Change set for the scripted/manual entry point.
    pub fn manual(
        inferred_type: BranchType,
        description: &str,
        files: impl IntoIterator<Item = PathBuf>,
        now: DateTime<Utc>,
    ) -> Result<Self, WorkflowError> {
        Self::new(files, description, inferred_type, ChangeOrigin::Manual, now)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.files.is_empty() {
            return Err(WorkflowError::Validation(
                "change set has no files".to_string(),
            ));
        }
        if self.description.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "change set description is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// First 12 hex chars of SHA-256 over type, description and sorted paths.
pub fn change_set_id(
    inferred_type: BranchType,
    description: &str,
    files: &BTreeSet<PathBuf>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(inferred_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(description.as_bytes());
    for file in files {
        hasher.update([0u8]);
        hasher.update(file.to_string_lossy().as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    digest[..12].to_string()
}

/// Workflow state machine. Declaration order is the forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Detected,
    Branching,
    Committing,
    Pushing,
    PrPending,
    Completed,
    CompletedWithWarning,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::CompletedWithWarning | WorkflowState::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Detected => "DETECTED",
            WorkflowState::Branching => "BRANCHING",
            WorkflowState::Committing => "COMMITTING",
            WorkflowState::Pushing => "PUSHING",
            WorkflowState::PrPending => "PR_PENDING",
            WorkflowState::Completed => "COMPLETED",
            WorkflowState::CompletedWithWarning => "COMPLETED_WITH_WARNING",
            WorkflowState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended in `FAILED`, and in which state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub state: WorkflowState,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub at: DateTime<Utc>,
    pub state: WorkflowState,
    pub message: String,
}

/// One execution of the branch, commit, push and PR pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub change_set: ChangeSet,
    pub branch: Option<Branch>,
    pub commit_ref: Option<CommitRef>,
    pub pushed: bool,
    pub pr_handle: Option<PrHandle>,
    pub state: WorkflowState,
    /// Attempts consumed per state (retry loops stay within one state).
    pub attempts: BTreeMap<WorkflowState, u32>,
    pub failure: Option<FailureRecord>,
    pub log: Vec<RunLogEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Distinguishes runs of the same change set started in the same millisecond.
static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl WorkflowRun {
    pub fn new(change_set: ChangeSet, now: DateTime<Utc>) -> Self {
        let seq = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let id = format!(
            "run-{}-{seq}-{}",
            now.format("%Y%m%d-%H%M%S%3f"),
            change_set.id
        );
        let mut run = Self {
            id,
            change_set,
            branch: None,
            commit_ref: None,
            pushed: false,
            pr_handle: None,
            state: WorkflowState::Detected,
            attempts: BTreeMap::new(),
            failure: None,
            log: Vec::new(),
            started_at: now,
            updated_at: now,
        };
        run.note(now, "change set detected");
        run
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn attempts_for(&self, state: WorkflowState) -> u32 {
        self.attempts.get(&state).copied().unwrap_or(0)
    }

    /// Count one attempt of the current state, returning the attempt number.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) -> u32 {
        let counter = self.attempts.entry(self.state).or_insert(0);
        *counter += 1;
        self.updated_at = now;
        *counter
    }

    /// Move forward. Returns false (and does nothing) for a backward move.
    pub fn transition(&mut self, to: WorkflowState, now: DateTime<Utc>) -> bool {
        if self.is_terminal() || to <= self.state {
            return false;
        }
        let from = self.state;
        self.state = to;
        self.note(now, &format!("{from} -> {to}"));
        true
    }

    pub fn fail(&mut self, err: &WorkflowError, now: DateTime<Utc>) {
        if self.is_terminal() {
            return;
        }
        self.failure = Some(FailureRecord {
            kind: err.kind(),
            state: self.state,
            message: err.to_string(),
        });
        let from = self.state;
        self.state = WorkflowState::Failed;
        self.note(now, &format!("{from} -> FAILED: {err}"));
    }

    /// Reopen a failed run at the state it failed in so it can be resumed.
    /// Attempt counters of that state restart from zero.
    pub fn reopen(&mut self, now: DateTime<Utc>) -> bool {
        let Some(failure) = self.failure.take() else {
            return false;
        };
        self.state = failure.state;
        self.attempts.remove(&failure.state);
        self.note(now, &format!("resumed at {}", failure.state));
        true
    }

    pub fn note(&mut self, now: DateTime<Utc>, message: &str) {
        self.updated_at = now;
        self.log.push(RunLogEntry {
            at: now,
            state: self.state,
            message: message.to_string(),
        });
    }
}
