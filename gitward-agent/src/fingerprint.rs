//! Content fingerprints for watched files.
//!
//! Editors and build tools touch files without changing them; comparing a
//! SHA-256 of the content against the last seen value drops those events.
//! Stored as JSON in `<git-dir>/gitward/file_hashes.json`.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const FINGERPRINT_FILE: &str = "file_hashes.json";

#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    hashes: BTreeMap<String, String>,
}

impl FingerprintStore {
    /// Load from `path`; a missing file starts empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let hashes = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read fingerprints {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse fingerprints {}", path.display()))?
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = hashes.len(), "fingerprints loaded");
        Ok(Self { path, hashes })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Record the current content of `root/rel`. Returns true when it differs
    /// from the last recorded content. Deletions always count as a change.
    pub fn observe(&mut self, root: &Path, rel: &Path) -> Result<bool> {
        let key = rel.to_string_lossy().to_string();
        let absolute = root.join(rel);
        if !absolute.is_file() {
            self.hashes.remove(&key);
            return Ok(!absolute.exists());
        }
        let digest = hash_file(&absolute)?;
        let changed = self.hashes.get(&key) != Some(&digest);
        self.hashes.insert(key, digest);
        Ok(changed)
    }

    /// Atomically write to disk (temp file + rename).
    pub fn save(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .with_context(|| format!("fingerprint path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut buf = serde_json::to_string_pretty(&self.hashes).context("serialize fingerprints")?;
        buf.push('\n');
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp fingerprints {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace fingerprints {}", self.path.display()))?;
        Ok(())
    }
}

/// Hex SHA-256 of a file's content.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_content_is_not_a_change() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "one").expect("write");
        let mut store = FingerprintStore::load(root.join("state/hashes.json")).expect("load");

        assert!(store.observe(root, Path::new("a.txt")).expect("first"));
        fs::write(root.join("a.txt"), "one").expect("rewrite");
        assert!(!store.observe(root, Path::new("a.txt")).expect("touch"));
        fs::write(root.join("a.txt"), "two").expect("modify");
        assert!(store.observe(root, Path::new("a.txt")).expect("modify"));
    }

    #[test]
    fn deletions_always_count() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let mut store = FingerprintStore::load(root.join("hashes.json")).expect("load");
        assert!(store.observe(root, Path::new("gone.txt")).expect("missing"));

        fs::write(root.join("b.txt"), "x").expect("write");
        store.observe(root, Path::new("b.txt")).expect("observe");
        fs::remove_file(root.join("b.txt")).expect("remove");
        assert!(store.observe(root, Path::new("b.txt")).expect("deleted"));
        assert!(store.is_empty());
    }

    #[test]
    fn directories_are_not_changes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::create_dir_all(root.join("docs")).expect("mkdir");
        let mut store = FingerprintStore::load(root.join("hashes.json")).expect("load");
        assert!(!store.observe(root, Path::new("docs")).expect("dir"));
    }

    #[test]
    fn save_then_load_keeps_hashes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        fs::write(root.join("a.txt"), "one").expect("write");
        let path = root.join("gitward").join(FINGERPRINT_FILE);
        let mut store = FingerprintStore::load(&path).expect("load");
        store.observe(root, Path::new("a.txt")).expect("observe");
        store.save().expect("save");

        let mut reloaded = FingerprintStore::load(&path).expect("reload");
        assert_eq!(reloaded.len(), 1);
        assert!(!reloaded.observe(root, Path::new("a.txt")).expect("same"));
    }
}
