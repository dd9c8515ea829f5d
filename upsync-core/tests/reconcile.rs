use std::path::{Path, PathBuf};
use std::sync::Mutex;
use upsync_core::hash;
use upsync_core::journal::JOURNAL_FILE;
use upsync_core::progress::{NoProgress, ProgressSink};
use upsync_core::reconcile::{run_check, CheckConfig, Mode};
use upsync_core::store::{DirStore, ObjectStore, StoreError};
use upsync_core::version::read_marker;
use upsync_core::worker::spawn_check;
use upsync_core::UpdateError;

const VERSION: &str = "1.0.0";
const FOLDER: &str = "demo-v1.0.0";

/// Store wrapper that records every requested object key.
struct LogStore<S> {
    inner: S,
    log: Mutex<Vec<String>>,
}

impl<S> LogStore<S> {
    fn new(inner: S) -> Self {
        Self { inner, log: Mutex::new(Vec::new()) }
    }

    fn keys(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl<S: ObjectStore> ObjectStore for LogStore<S> {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(key.to_string());
        self.inner.get(key, dest, on_bytes)
    }
}

#[derive(Default)]
struct Recorder {
    stages: Vec<String>,
    scan: Vec<(u64, u64)>,
    download: Vec<(u64, u64)>,
}

impl ProgressSink for Recorder {
    fn stage(&mut self, name: &str) {
        self.stages.push(name.to_string());
    }

    fn scan(&mut self, done: u64, total: u64) {
        self.scan.push((done, total));
    }

    fn download(&mut self, done: u64, total: u64) {
        self.download.push((done, total));
    }
}

/// Stage the remote side: objects under `<mirror>/<FOLDER>/` plus a
/// checksum.txt manifest describing them. Returns the manifest path.
fn stage_remote(mirror: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let folder = mirror.join(FOLDER);
    let mut manifest = String::new();
    for (rel, bytes) in files {
        let p = folder.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, bytes).unwrap();
        manifest.push_str(&format!("{}|{}|{}\n", rel, hash::digest(&p), bytes.len()));
    }
    let mpath = folder.join("checksum.txt");
    std::fs::write(&mpath, manifest).unwrap();
    mpath
}

fn config(root: &Path, state: &Path, manifest: &Path, mode: Mode) -> CheckConfig {
    CheckConfig {
        root: root.to_path_buf(),
        state_dir: state.to_path_buf(),
        manifest_path: manifest.to_path_buf(),
        remote_version: VERSION.to_string(),
        folder_prefix: "demo".to_string(),
        mode,
        cancel: Default::default(),
    }
}

#[test]
fn parallel_journals_then_drains_missing_and_corrupt() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(
        &mirror,
        &[("a.txt", b"alpha"), ("b.txt", b"bravo-bytes"), ("sub/c.bin", b"charlie!")],
    );
    // Local tree: a correct, b missing, c corrupted.
    std::fs::write(root.join("a.txt"), b"alpha").unwrap();
    std::fs::create_dir_all(root.join("sub")).unwrap();
    std::fs::write(root.join("sub/c.bin"), b"WRONG---").unwrap();

    // First attempt against an empty mirror: the scan succeeds and the
    // journal is sealed, but both fetches fail.
    let empty = td.path().join("empty-mirror");
    std::fs::create_dir_all(&empty).unwrap();
    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let failing = LogStore::new(DirStore::new(&empty));
    let report = run_check(&cfg, &failing, &mut NoProgress).unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.failures.len(), 2);
    assert!(!report.success());
    assert_eq!(report.bytes_total, 11 + 8);
    assert_eq!(read_marker(&state).unwrap(), None);

    // The journal survives the failed session: header, exactly the two
    // mismatched entries in manifest order, and a footer with their sum.
    let text = std::fs::read_to_string(state.join(JOURNAL_FILE)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["1.0.0", "b.txt|11", "sub/c.bin|8", "Checksum v1.0 | 19"]);

    // Retry against the real mirror: the completed journal is resumed (no
    // re-scan) and exactly the two recorded objects are fetched.
    let store = LogStore::new(DirStore::new(&mirror));
    let report = run_check(&cfg, &store, &mut NoProgress).unwrap();
    assert!(report.resumed);
    assert_eq!(report.scanned, 0);
    assert!(report.success());
    assert_eq!(report.fetched, 2);
    assert_eq!(store.keys(), vec![format!("{FOLDER}/b.txt"), format!("{FOLDER}/sub/c.bin")]);

    assert_eq!(std::fs::read(root.join("b.txt")).unwrap(), b"bravo-bytes");
    assert_eq!(std::fs::read(root.join("sub/c.bin")).unwrap(), b"charlie!");
    assert_eq!(read_marker(&state).unwrap(), Some(VERSION.to_string()));
    assert!(!state.join(JOURNAL_FILE).exists());
}

#[test]
fn synced_tree_fetches_nothing_twice() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.txt", b"same"), ("b.txt", b"bytes")]);
    std::fs::write(root.join("a.txt"), b"same").unwrap();
    std::fs::write(root.join("b.txt"), b"bytes").unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    for _ in 0..2 {
        let store = LogStore::new(DirStore::new(&mirror));
        let report = run_check(&cfg, &store, &mut NoProgress).unwrap();
        assert!(report.success());
        assert_eq!(report.fetched, 0);
        assert!(store.keys().is_empty());
    }
    assert_eq!(read_marker(&state).unwrap(), Some(VERSION.to_string()));
}

#[test]
fn sequential_fetches_inline_during_scan() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.txt", b"present"), ("b.txt", b"fetched")]);
    std::fs::write(root.join("a.txt"), b"present").unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Sequential);
    let store = LogStore::new(DirStore::new(&mirror));
    let report = run_check(&cfg, &store, &mut NoProgress).unwrap();
    assert!(report.success());
    assert_eq!(report.fetched, 1);
    assert_eq!(report.bytes_total, 7);
    assert_eq!(store.keys(), vec![format!("{FOLDER}/b.txt")]);
    assert_eq!(std::fs::read(root.join("b.txt")).unwrap(), b"fetched");
    // Sequential mode never journals; nothing pending is left behind.
    assert!(!state.join(JOURNAL_FILE).exists());
    assert_eq!(read_marker(&state).unwrap(), Some(VERSION.to_string()));
}

#[test]
fn progress_channels_for_single_pending_file() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let payload = vec![0x5Au8; 1024];
    let manifest = stage_remote(&mirror, &[("blob.bin", &payload)]);

    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let store = DirStore::new(&mirror);
    let mut rec = Recorder::default();
    let report = run_check(&cfg, &store, &mut rec).unwrap();
    assert!(report.success());

    assert_eq!(rec.scan, vec![(0, 1), (1, 1)]);
    assert_eq!(rec.download.first(), Some(&(0, 1024)));
    assert_eq!(rec.download.last(), Some(&(1024, 1024)));
    let mut prev = 0;
    for &(done, total) in &rec.download {
        assert_eq!(total, 1024);
        assert!(done >= prev, "download progress went backwards: {done} < {prev}");
        prev = done;
    }
}

#[test]
fn failed_only_fetch_leaves_marker_and_journal() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("only.bin", b"0123456789")]);
    // Delete the object but keep the manifest: the fetch must fail.
    std::fs::remove_file(mirror.join(FOLDER).join("only.bin")).unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let report = run_check(&cfg, &DirStore::new(&mirror), &mut NoProgress).unwrap();
    assert!(!report.success());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].reason.contains("not found"));
    assert_eq!(read_marker(&state).unwrap(), None);

    let before = std::fs::read_to_string(state.join(JOURNAL_FILE)).unwrap();
    // The retry resumes from the untouched journal.
    let report = run_check(&cfg, &DirStore::new(&mirror), &mut NoProgress).unwrap();
    assert!(report.resumed);
    assert!(!report.success());
    assert_eq!(std::fs::read_to_string(state.join(JOURNAL_FILE)).unwrap(), before);
}

#[test]
fn failed_sequential_session_leaves_no_journal() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("only.bin", b"0123456789")]);
    std::fs::remove_file(mirror.join(FOLDER).join("only.bin")).unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Sequential);
    let report = run_check(&cfg, &DirStore::new(&mirror), &mut NoProgress).unwrap();
    assert!(!report.success());
    assert_eq!(read_marker(&state).unwrap(), None);
    // Sequential mode never journals entries, so nothing pending may be
    // advertised after the failure either.
    assert!(!state.join(JOURNAL_FILE).exists());
}

#[test]
fn sequential_inline_fetch_runs_under_download_stage() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.txt", b"present"), ("b.txt", b"fetched")]);
    std::fs::write(root.join("a.txt"), b"present").unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Sequential);
    let mut rec = Recorder::default();
    let report = run_check(&cfg, &DirStore::new(&mirror), &mut rec).unwrap();
    assert!(report.success());
    assert_eq!(rec.stages, vec!["scan", "download", "scan"]);
}

/// Store wrapper that trips the session's cancel flag once it has served one
/// object, simulating a cancel request arriving mid-drain.
struct CancelAfterFirst<S> {
    inner: S,
    cancel: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl<S: ObjectStore> ObjectStore for CancelAfterFirst<S> {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError> {
        let result = self.inner.get(key, dest, on_bytes);
        self.cancel.store(true, std::sync::atomic::Ordering::Relaxed);
        result
    }
}

#[test]
fn cancel_between_fetches_stops_the_drain() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.bin", b"first"), ("b.bin", b"second")]);
    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let store = LogStore::new(CancelAfterFirst {
        inner: DirStore::new(&mirror),
        cancel: cfg.cancel.clone(),
    });

    match run_check(&cfg, &store, &mut NoProgress) {
        Err(UpdateError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
    // Exactly one fetch happened before the flag was honored.
    assert_eq!(store.keys(), vec![format!("{FOLDER}/a.bin")]);
    assert_eq!(std::fs::read(root.join("a.bin")).unwrap(), b"first");
    assert!(!root.join("b.bin").exists());
    // The sealed journal survives the cancellation, so a later check resumes
    // the drain instead of re-scanning.
    assert_eq!(read_marker(&state).unwrap(), None);
    assert!(state.join(JOURNAL_FILE).exists());
    cfg.cancel.store(false, std::sync::atomic::Ordering::Relaxed);
    let report = run_check(&cfg, &DirStore::new(&mirror), &mut NoProgress).unwrap();
    assert!(report.resumed);
    assert!(report.success());
}

#[test]
fn preset_cancel_flag_stops_before_work() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.txt", b"abc")]);
    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    cfg.cancel.store(true, std::sync::atomic::Ordering::Relaxed);
    match run_check(&cfg, &DirStore::new(&mirror), &mut NoProgress) {
        Err(UpdateError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert_eq!(read_marker(&state).unwrap(), None);
}

#[test]
fn parent_traversal_in_manifest_is_fatal() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = td.path().join("checksum.txt");
    std::fs::write(&manifest, "../evil.txt|deadbeef|10\n").unwrap();

    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let empty = td.path().join("mirror");
    std::fs::create_dir_all(&empty).unwrap();
    match run_check(&cfg, &DirStore::new(&empty), &mut NoProgress) {
        Err(UpdateError::PathUnsafe(_)) => {}
        other => panic!("expected PathUnsafe, got {other:?}"),
    }
}

#[test]
fn spawn_check_reports_through_the_handle() {
    let td = tempfile::tempdir().unwrap();
    let mirror = td.path().join("mirror");
    let root = td.path().join("install");
    let state = td.path().join("state");
    std::fs::create_dir_all(&root).unwrap();

    let manifest = stage_remote(&mirror, &[("a.txt", b"worker")]);
    let cfg = config(&root, &state, &manifest, Mode::Parallel);
    let handle = spawn_check(cfg, DirStore::new(&mirror), NoProgress);
    let report = handle.join().unwrap();
    assert!(report.success());
    assert_eq!(report.fetched, 1);
    assert_eq!(std::fs::read(root.join("a.txt")).unwrap(), b"worker");
}
