use crate::error::Result;
use crate::path_safety::validate_rel_path;
use crate::progress::ProgressSink;
use crate::store::ObjectStore;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Object key of the checksum manifest within a version folder.
pub const MANIFEST_OBJECT: &str = "checksum.txt";

/// Remote per-version namespace, e.g. `Project86-v1.4.0`.
pub fn version_folder(prefix: &str, version: &str) -> String {
    format!("{prefix}-v{version}")
}

#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub rel_path: String,
    pub reason: String,
}

/// Drives single-object fetches and folds per-object byte progress into one
/// monotonic session-wide `(cumulative, total)` signal.
///
/// The cumulative counter advances by the manifest-recorded size after every
/// entry, success or not, so the bar never runs backwards; failures are
/// recorded and reported instead of aborting the queue.
pub struct Downloader<'a> {
    store: &'a dyn ObjectStore,
    root: &'a Path,
    version_folder: String,
    completed: u64,
    total: u64,
    fetched: u64,
    failures: Vec<FetchFailure>,
}

impl<'a> Downloader<'a> {
    pub fn new(store: &'a dyn ObjectStore, root: &'a Path, version_folder: String) -> Self {
        Self { store, root, version_folder, completed: 0, total: 0, fetched: 0, failures: Vec::new() }
    }

    /// Set the denominator up front (drain phase: the journal's recorded
    /// total).
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Grow the denominator per file (sequential mode: the total is not known
    /// until the scan ends).
    pub fn add_total(&mut self, size: u64) {
        self.total += size;
    }

    pub fn fetched(&self) -> u64 {
        self.fetched
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failures(&self) -> &[FetchFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<FetchFailure> {
        self.failures
    }

    /// Fetch one pending file to its place under the root. Returns whether
    /// the transfer succeeded; a failure is recorded, not propagated, since
    /// the rest of the queue should still be attempted.
    pub fn fetch_one(
        &mut self,
        rel_path: &str,
        size: u64,
        sink: &mut dyn ProgressSink,
    ) -> Result<bool> {
        let rel = validate_rel_path(rel_path)?;
        let key = object_key(&self.version_folder, &rel);
        let dest = self.root.join(&rel);

        sink.download(self.completed, self.total);
        let base = self.completed;
        let total = self.total;
        let ok = {
            let mut on_bytes = |transferred: u64| sink.download(base + transferred, total);
            match self.store.get(&key, &dest, &mut on_bytes) {
                Ok(()) => {
                    info!(%key, size, "fetched");
                    self.fetched += 1;
                    true
                }
                Err(e) => {
                    warn!(%key, error = %e, "fetch failed");
                    self.failures.push(FetchFailure {
                        rel_path: rel_path.to_string(),
                        reason: e.to_string(),
                    });
                    false
                }
            }
        };
        self.completed += size;
        sink.download(self.completed, self.total);
        Ok(ok)
    }
}

fn object_key(version_folder: &str, rel: &Path) -> String {
    let rel = rel.to_string_lossy().replace('\\', "/");
    format!("{version_folder}/{rel}")
}

/// Download the checksum manifest for a version into the state directory and
/// return its local path. Unlike per-file fetches this failure is fatal:
/// without a manifest there is nothing to check.
pub fn fetch_manifest(
    store: &dyn ObjectStore,
    version_folder: &str,
    state_dir: &Path,
) -> Result<PathBuf> {
    let dest = state_dir.join(MANIFEST_OBJECT);
    let key = format!("{version_folder}/{MANIFEST_OBJECT}");
    store.get(&key, &dest, &mut |_| {})?;
    Ok(dest)
}
