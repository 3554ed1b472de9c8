//! Filesystem watcher feeding repo-relative paths into a tokio channel.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
const EVENT_BUFFER: usize = 1024;

/// Keeps the underlying watcher alive; dropping it stops event delivery.
pub struct RepoWatcher {
    _watcher: PollWatcher,
    root: PathBuf,
}

impl RepoWatcher {
    /// Watch `dirs` (relative to `root`) recursively. Missing directories are
    /// skipped with a warning.
    pub fn start(
        root: &Path,
        dirs: &[PathBuf],
        poll_interval: Duration,
    ) -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve {}", root.display()))?;
        let (tx, rx) = mpsc::channel::<PathBuf>(EVENT_BUFFER);

        let event_root = root.clone();
        let mut watcher = PollWatcher::new(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    for rel in relevant_paths(&event_root, &event) {
                        if tx.try_send(rel).is_err() {
                            warn!("watch event buffer full, dropping event");
                        }
                    }
                }
                Err(err) => warn!(error = %err, "watch error"),
            },
            notify::Config::default().with_poll_interval(poll_interval),
        )
        .context("create file watcher")?;

        for dir in dirs {
            let path = root.join(dir);
            let Ok(path) = path.canonicalize() else {
                warn!(path = %path.display(), "watch directory missing, skipping");
                continue;
            };
            watcher
                .watch(&path, RecursiveMode::Recursive)
                .with_context(|| format!("watch {}", path.display()))?;
            info!(path = %path.display(), "watching directory");
        }

        Ok((
            Self {
                _watcher: watcher,
                root,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Repo-relative paths of a create/modify/remove event.
fn relevant_paths(root: &Path, event: &NotifyEvent) -> Vec<PathBuf> {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|path| {
            let rel = path.strip_prefix(root).ok()?;
            if rel.as_os_str().is_empty() {
                return None;
            }
            debug!(path = %rel.display(), kind = ?event.kind, "file event");
            Some(rel.to_path_buf())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    fn event(kind: EventKind, paths: &[&str]) -> NotifyEvent {
        let mut event = NotifyEvent::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn keeps_changes_under_root_as_relative_paths() {
        let root = Path::new("/repo");
        let paths = relevant_paths(
            root,
            &event(
                EventKind::Modify(ModifyKind::Any),
                &["/repo/docs/a.md", "/elsewhere/b.md", "/repo"],
            ),
        );
        assert_eq!(paths, vec![PathBuf::from("docs/a.md")]);
    }

    #[test]
    fn ignores_access_events() {
        let root = Path::new("/repo");
        assert!(
            relevant_paths(root, &event(EventKind::Access(AccessKind::Any), &["/repo/a"]))
                .is_empty()
        );
        assert_eq!(
            relevant_paths(root, &event(EventKind::Create(CreateKind::File), &["/repo/a"])),
            vec![PathBuf::from("a")]
        );
    }

    #[tokio::test]
    async fn delivers_file_creation() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("docs")).expect("mkdir");
        let (_watcher, mut rx) = RepoWatcher::start(
            temp.path(),
            &[PathBuf::from("docs"), PathBuf::from("missing")],
            Duration::from_millis(50),
        )
        .expect("start");

        std::fs::write(temp.path().join("docs/new.md"), "# new\n").expect("write");
        let expected = PathBuf::from("docs/new.md");
        let seen = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(path) = rx.recv().await {
                if path == expected {
                    return true;
                }
            }
            false
        })
        .await
        .expect("event before timeout");
        assert!(seen);
    }
}
