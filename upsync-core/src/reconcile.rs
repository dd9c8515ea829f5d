use crate::error::{Result, UpdateError};
use crate::fetch::{version_folder, Downloader, FetchFailure};
use crate::hash;
use crate::journal::Journal;
use crate::manifest::ManifestReader;
use crate::path_safety::validate_rel_path;
use crate::progress::ProgressSink;
use crate::store::ObjectStore;
use crate::version;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// How a mismatched file is handled during the scan.
///
/// `Sequential` fetches it immediately and keeps scanning: first byte moves
/// sooner, but the progress denominator grows file by file. `Parallel`
/// journals it and only downloads after the full scan: the total transfer
/// size is known up front and the journal makes the download phase resumable
/// if the process dies between scan and drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Parallel,
}

/// Everything one check invocation needs. Discarded at the end of the call.
#[derive(Clone)]
pub struct CheckConfig {
    /// Install tree being reconciled.
    pub root: PathBuf,
    /// Where the journal, version marker, and fetched manifests live.
    pub state_dir: PathBuf,
    /// Local path of the already-fetched checksum manifest.
    pub manifest_path: PathBuf,
    /// Version identifier the manifest describes, e.g. `1.4.0`.
    pub remote_version: String,
    /// Remote namespace prefix; objects live under `{prefix}-v{version}/`.
    pub folder_prefix: String,
    pub mode: Mode,
    /// Cooperative cancellation, checked between manifest lines and between
    /// fetches.
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct CheckReport {
    /// Manifest lines scanned (0 when the scan was skipped via resume).
    pub scanned: u64,
    /// Files fetched successfully.
    pub fetched: u64,
    /// Per-file fetch failures; empty means the session succeeded and the
    /// version marker was advanced.
    pub failures: Vec<FetchFailure>,
    /// Download-progress denominator for the session.
    pub bytes_total: u64,
    /// True when a completed journal for this version made the scan
    /// unnecessary.
    pub resumed: bool,
}

impl CheckReport {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run one full check: open or resume the journal, scan the manifest against
/// the local tree, and fetch whatever is missing or stale. On full success
/// the version marker is advanced and the journal removed; on any fetch
/// failure both are left alone so a retry re-runs against the same remote
/// version.
pub fn run_check(
    cfg: &CheckConfig,
    store: &dyn ObjectStore,
    sink: &mut dyn ProgressSink,
) -> Result<CheckReport> {
    let mut journal = Journal::open_or_create(&cfg.state_dir, &cfg.remote_version)?;
    let folder = version_folder(&cfg.folder_prefix, &cfg.remote_version);
    let mut dl = Downloader::new(store, &cfg.root, folder);
    let resumed = journal.resumed();

    let mut scanned = 0u64;
    if resumed {
        info!(version = %cfg.remote_version, "journal complete, skipping scan");
    } else {
        let total_lines = ManifestReader::count_lines(&cfg.manifest_path)?;
        if cfg.mode == Mode::Parallel {
            journal.write_header()?;
        }
        sink.stage("scan");
        for entry in ManifestReader::open(&cfg.manifest_path)? {
            if cfg.cancel.load(Ordering::Relaxed) {
                return Err(UpdateError::Cancelled);
            }
            sink.scan(scanned, total_lines);
            let entry = entry?;
            let rel = validate_rel_path(&entry.rel_path)?;
            let local = cfg.root.join(&rel);
            let got = hash::digest(&local);
            if got == entry.digest_hex {
                debug!(path = %entry.rel_path, "match");
            } else {
                debug!(path = %entry.rel_path, expected = %entry.digest_hex, "mismatch");
                match cfg.mode {
                    Mode::Sequential => {
                        dl.add_total(entry.size);
                        sink.stage("download");
                        dl.fetch_one(&entry.rel_path, entry.size, sink)?;
                        sink.stage("scan");
                    }
                    Mode::Parallel => journal.append_entry(&entry.rel_path, entry.size)?,
                }
            }
            scanned += 1;
        }
        sink.scan(scanned, total_lines);
        if cfg.mode == Mode::Parallel {
            journal.finalize()?;
        }
    }

    // Drain phase: everything the journal recorded, in append order, one at
    // a time. Sequential scans leave the journal empty so this is a no-op.
    if resumed || cfg.mode == Mode::Parallel {
        sink.stage("download");
        dl.set_total(journal.total_bytes());
        for pending in journal.drain()? {
            if cfg.cancel.load(Ordering::Relaxed) {
                return Err(UpdateError::Cancelled);
            }
            let pending = pending?;
            dl.fetch_one(&pending.rel_path, pending.size, sink)?;
        }
    }

    let report = CheckReport {
        scanned,
        fetched: dl.fetched(),
        bytes_total: dl.total(),
        failures: dl.into_failures(),
        resumed,
    };

    if report.success() {
        version::write_marker(&cfg.state_dir, &cfg.remote_version)?;
        journal.remove()?;
        info!(version = %cfg.remote_version, fetched = report.fetched, "check complete");
    } else {
        if cfg.mode == Mode::Sequential && !resumed {
            // A sequential scan never journals entries; an empty leftover
            // would make status report pending work that does not exist.
            journal.remove()?;
        }
        info!(failed = report.failures.len(), "check finished with failures, marker not advanced");
    }
    Ok(report)
}
