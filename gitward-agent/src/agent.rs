//! Autonomous agent: debounced change detection feeding a serialized
//! workflow queue.
//!
//! One consumer task per repository takes change sets off a bounded FIFO and
//! runs each through [`WorkflowEngine::process`] on the blocking pool,
//! awaiting it before taking the next. Runs therefore never overlap, and a
//! failed run is logged without stopping the loop.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use chrono::Utc;
use gitward::core::classifier::is_ignored;
use gitward::core::types::{BranchType, ChangeSet, WorkflowRun, WorkflowState};
use gitward::engine::WorkflowEngine;
use gitward::io::config::AgentConfig;
use gitward::io::pr::PrGateway;
use gitward::io::repo::RepositoryHandle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::debounce::{Debouncer, split_window};
use crate::fingerprint::FingerprintStore;

struct Job {
    change_set: ChangeSet,
    reply: Option<oneshot::Sender<WorkflowRun>>,
}

pub struct AutonomousAgent<R, P> {
    engine: Arc<WorkflowEngine<R, P>>,
    config: AgentConfig,
    tx: mpsc::Sender<Job>,
    queued: Arc<Mutex<HashSet<String>>>,
    stopping: Arc<AtomicBool>,
    consumer: JoinHandle<()>,
}

impl<R, P> AutonomousAgent<R, P>
where
    R: RepositoryHandle + Send + 'static,
    P: PrGateway + Send + Sync + 'static,
{
    /// Spawn the consumer task. Must be called inside a tokio runtime.
    pub fn start(engine: Arc<WorkflowEngine<R, P>>, config: AgentConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let queued = Arc::new(Mutex::new(HashSet::new()));
        let stopping = Arc::new(AtomicBool::new(false));
        let consumer = tokio::spawn(consume(
            Arc::clone(&engine),
            rx,
            Arc::clone(&queued),
            Arc::clone(&stopping),
        ));
        Self {
            engine,
            config,
            tx,
            queued,
            stopping,
            consumer,
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine<R, P>> {
        &self.engine
    }

    /// Queue `change_set`. Returns false when an identical change set is
    /// already waiting. Waits while the queue is full.
    pub async fn enqueue(&self, change_set: ChangeSet) -> Result<bool> {
        self.send(change_set, None).await
    }

    /// Run a manually described change through the same queue and engine,
    /// waiting for its terminal run.
    #[instrument(skip_all, fields(branch_type = %branch_type))]
    pub async fn process_manual(
        &self,
        branch_type: BranchType,
        description: &str,
        files: Vec<PathBuf>,
    ) -> Result<WorkflowRun> {
        let change_set = ChangeSet::manual(branch_type, description, files, Utc::now())?;
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(change_set, Some(reply_tx)).await? {
            return Err(anyhow!("an identical change set is already queued"));
        }
        reply_rx
            .await
            .map_err(|_| anyhow!("agent stopped before the change set was processed"))
    }

    /// Watch loop: fingerprint, debounce and enqueue until `shutdown`
    /// resolves or the event stream ends. Pending, unclosed windows are
    /// dropped on shutdown.
    pub async fn monitor(
        &self,
        root: &Path,
        events: &mut mpsc::Receiver<PathBuf>,
        fingerprints: &mut FingerprintStore,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let mut debouncer = Debouncer::new(self.config.debounce());
        tokio::pin!(shutdown);
        info!(window_ms = self.config.debounce_ms, "monitoring for changes");

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                () = &mut shutdown => {
                    if !debouncer.pending().is_empty() {
                        warn!(pending = debouncer.pending().len(), "shutdown with unprocessed changes");
                    }
                    break;
                }
                event = events.recv() => {
                    let Some(rel) = event else { break };
                    self.observe(root, rel, fingerprints, &mut debouncer);
                }
                () = wait_until(deadline) => {
                    self.close_window(&mut debouncer, fingerprints).await?;
                }
            }
        }
        Ok(())
    }

    /// Stop accepting work, let the in-flight run finish, and drop anything
    /// still queued.
    pub async fn shutdown(self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        drop(self.tx);
        self.consumer
            .await
            .map_err(|err| anyhow!("agent consumer task failed: {err}"))
    }

    fn observe(
        &self,
        root: &Path,
        rel: PathBuf,
        fingerprints: &mut FingerprintStore,
        debouncer: &mut Debouncer,
    ) {
        if is_ignored(&rel, &self.config.ignore_patterns) {
            return;
        }
        let changed = fingerprints.observe(root, &rel).unwrap_or_else(|err| {
            warn!(path = %rel.display(), error = %format!("{err:#}"), "fingerprint failed");
            true
        });
        if changed {
            debug!(path = %rel.display(), "change recorded");
            debouncer.record(rel, Instant::now());
        }
    }

    async fn close_window(
        &self,
        debouncer: &mut Debouncer,
        fingerprints: &FingerprintStore,
    ) -> Result<()> {
        let paths = debouncer.take();
        info!(files = paths.len(), "change window closed");
        if let Err(err) = fingerprints.save() {
            warn!(error = %format!("{err:#}"), "failed to save fingerprints");
        }
        let change_sets = match split_window(paths, &self.config.docs_dirs, Utc::now()) {
            Ok(change_sets) => change_sets,
            Err(err) => {
                warn!(error = %err, "invalid change window");
                return Ok(());
            }
        };
        for change_set in change_sets {
            self.enqueue(change_set).await?;
        }
        Ok(())
    }

    async fn send(
        &self,
        change_set: ChangeSet,
        reply: Option<oneshot::Sender<WorkflowRun>>,
    ) -> Result<bool> {
        let id = change_set.id.clone();
        {
            let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
            if !queued.insert(id.clone()) {
                debug!(change_set = %id, "duplicate change set dropped");
                return Ok(false);
            }
        }
        info!(
            change_set = %id,
            branch_type = %change_set.inferred_type,
            files = change_set.files.len(),
            "change set queued"
        );
        if self.tx.send(Job { change_set, reply }).await.is_err() {
            self.queued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(anyhow!("agent is not running"));
        }
        Ok(true)
    }
}

async fn consume<R, P>(
    engine: Arc<WorkflowEngine<R, P>>,
    mut rx: mpsc::Receiver<Job>,
    queued: Arc<Mutex<HashSet<String>>>,
    stopping: Arc<AtomicBool>,
) where
    R: RepositoryHandle + Send + 'static,
    P: PrGateway + Send + Sync + 'static,
{
    while let Some(Job { change_set, reply }) = rx.recv().await {
        queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&change_set.id);
        if stopping.load(Ordering::SeqCst) {
            warn!(change_set = %change_set.id, "shutting down, dropping queued change set");
            continue;
        }
        let engine = Arc::clone(&engine);
        let run = match tokio::task::spawn_blocking(move || engine.process(change_set)).await {
            Ok(run) => run,
            Err(err) => {
                warn!(error = %err, "workflow task panicked");
                continue;
            }
        };
        match run.state {
            WorkflowState::Failed => warn!(
                run_id = %run.id,
                failure = ?run.failure,
                "workflow run failed"
            ),
            state => info!(run_id = %run.id, state = %state, "workflow run finished"),
        }
        if let Some(reply) = reply {
            let _ = reply.send(run);
        }
    }
    debug!("agent queue closed");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
