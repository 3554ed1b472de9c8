//! Workflow run records stored under `<git-dir>/gitward/runs/<run-id>.json`.
//!
//! Records are rewritten at every transition and attempt, so a crash leaves
//! the last completed step on disk for `gitward resume`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::core::types::WorkflowRun;

pub const STATE_DIR: &str = "gitward";
const RUNS_DIR: &str = "runs";

#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the repository's git directory.
    pub fn for_git_dir(git_dir: &Path) -> Self {
        Self::new(git_dir.join(STATE_DIR).join(RUNS_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Atomically write `run` (temp file + rename).
    pub fn save(&self, run: &WorkflowRun) -> Result<()> {
        let path = self.path_for(&run.id);
        debug!(path = %path.display(), run_id = %run.id, state = %run.state, "writing run record");
        let mut buf = serde_json::to_string_pretty(run).context("serialize run record")?;
        buf.push('\n');
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp run record {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace run record {}", path.display()))?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<WorkflowRun> {
        if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
            return Err(anyhow!("invalid run id '{run_id}'"));
        }
        let path = self.path_for(run_id);
        if !path.exists() {
            return Err(anyhow!("unknown run '{run_id}'"));
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("read run record {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse run record {}", path.display()))
    }

    /// All stored runs, oldest first.
    pub fn list(&self) -> Result<Vec<WorkflowRun>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("read directory {}", self.dir.display()))?;
        for entry in entries {
            let path = entry.context("read run entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read run record {}", path.display()))?;
            let run: WorkflowRun = serde_json::from_str(&contents)
                .with_context(|| format!("parse run record {}", path.display()))?;
            runs.push(run);
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(runs)
    }
}
