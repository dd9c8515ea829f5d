use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use upsync_core::fetch::{fetch_manifest, version_folder};
use upsync_core::journal::JOURNAL_FILE;
use upsync_core::manifest::FIELD_SEP;
use upsync_core::progress::Progress;
use upsync_core::reconcile::{CheckConfig, Mode};
use upsync_core::store::{DirStore, HttpStore, ObjectStore};
use upsync_core::version::{read_marker, Version};
use upsync_core::worker::spawn_check;
use upsync_core::{hash, UpdateError};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    /// Download each stale file as soon as the scan finds it.
    Sequential,
    /// Journal stale files during the scan, download after (resumable).
    Parallel,
}

#[derive(Parser)]
#[command(name = "upsync", version, about = "manifest-driven differential updater")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Reconcile an install tree against a remote version and fetch what's stale
    Check {
        /// Install root to update
        #[arg(long)]
        root: PathBuf,
        /// State directory (journal, version marker); default: <root>/.upsync
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Target remote version, e.g. 1.4.0 or v1.4.0-beta
        #[arg(long)]
        remote_version: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Parallel)]
        mode: ModeArg,
        /// HTTP object-store endpoint, e.g. https://s3.example.com
        #[arg(long)]
        endpoint: Option<String>,
        /// Bucket under the endpoint
        #[arg(long)]
        bucket: Option<String>,
        /// Local mirror directory instead of an HTTP endpoint
        #[arg(long)]
        mirror: Option<PathBuf>,
        /// Remote folder prefix; objects live under <prefix>-v<version>/
        #[arg(long)]
        prefix: Option<String>,
        /// Use an already-downloaded manifest instead of fetching checksum.txt
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// JSON settings file (endpoint/bucket/prefix/mirror)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Show the installed version marker and pending-journal state
    Status {
        #[arg(long)]
        state_dir: PathBuf,
    },
    /// Write a checksum manifest for a release tree (publisher side)
    Manifest { dir: PathBuf, out: PathBuf },
}

/// Settings file mirroring the launcher's on-disk configuration; any flag
/// given on the command line wins over the file.
#[derive(Deserialize, Default)]
struct Settings {
    endpoint: Option<String>,
    bucket: Option<String>,
    prefix: Option<String>,
    mirror: Option<PathBuf>,
}

impl Settings {
    fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(p) => {
                let f = File::open(p).with_context(|| format!("open config {}", p.display()))?;
                serde_json::from_reader(f).with_context(|| format!("parse config {}", p.display()))
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Check {
            root,
            state_dir,
            remote_version,
            mode,
            endpoint,
            bucket,
            mirror,
            prefix,
            manifest,
            config,
            progress,
        } => check(
            root,
            state_dir,
            remote_version,
            mode,
            endpoint,
            bucket,
            mirror,
            prefix,
            manifest,
            config,
            progress,
        ),
        Cmd::Status { state_dir } => status(&state_dir),
        Cmd::Manifest { dir, out } => write_manifest(&dir, &out),
    }
}

#[allow(clippy::too_many_arguments)]
fn check(
    root: PathBuf,
    state_dir: Option<PathBuf>,
    remote_version: String,
    mode: ModeArg,
    endpoint: Option<String>,
    bucket: Option<String>,
    mirror: Option<PathBuf>,
    prefix: Option<String>,
    manifest: Option<PathBuf>,
    config: Option<PathBuf>,
    progress: bool,
) -> Result<()> {
    let settings = Settings::load(config.as_deref())?;
    let remote_version: Version = remote_version.parse()?;
    let remote_version = remote_version.to_string();
    let state_dir = state_dir.unwrap_or_else(|| root.join(".upsync"));
    let prefix = prefix
        .or(settings.prefix)
        .ok_or_else(|| anyhow!("--prefix is required (or set it in the config file)"))?;

    let store: Box<dyn ObjectStore + Send> = match mirror.or(settings.mirror) {
        Some(dir) => Box::new(DirStore::new(dir)),
        None => {
            let endpoint = endpoint
                .or(settings.endpoint)
                .ok_or_else(|| anyhow!("--endpoint or --mirror is required"))?;
            let bucket = bucket
                .or(settings.bucket)
                .ok_or_else(|| anyhow!("--bucket is required with --endpoint"))?;
            Box::new(HttpStore::new(&endpoint, &bucket)?)
        }
    };

    let manifest_path = match manifest {
        Some(p) => p,
        None => {
            std::fs::create_dir_all(&state_dir)?;
            let folder = version_folder(&prefix, &remote_version);
            fetch_manifest(store.as_ref(), &folder, &state_dir).context("fetch checksum manifest")?
        }
    };

    let cfg = CheckConfig {
        root,
        state_dir,
        manifest_path,
        remote_version: remote_version.clone(),
        folder_prefix: prefix,
        mode: match mode {
            ModeArg::Sequential => Mode::Sequential,
            ModeArg::Parallel => Mode::Parallel,
        },
        cancel: Default::default(),
    };

    let reporter = Progress::new(progress);
    reporter.start();
    let handle = spawn_check(cfg, store, reporter.clone());
    let report = handle.join();
    reporter.stop();

    match report {
        Ok(report) => {
            println!(
                "version {}: scanned {} lines, fetched {} files ({} bytes pending){}",
                remote_version,
                report.scanned,
                report.fetched,
                report.bytes_total,
                if report.resumed { " [resumed]" } else { "" }
            );
            if report.success() {
                println!("OK");
                Ok(())
            } else {
                for f in &report.failures {
                    eprintln!("failed: {} ({})", f.rel_path, f.reason);
                }
                bail!("{} file(s) failed to download; version not advanced", report.failures.len());
            }
        }
        Err(UpdateError::SessionBusy) => bail!("another check is already running"),
        Err(e) => Err(e.into()),
    }
}

fn status(state_dir: &Path) -> Result<()> {
    match read_marker(state_dir)? {
        Some(v) => println!("installed: {v}"),
        None => println!("installed: none"),
    }
    if state_dir.join(JOURNAL_FILE).exists() {
        println!("pending journal: present");
    } else {
        println!("pending journal: none");
    }
    Ok(())
}

/// Publisher-side counterpart of the reader: walk a release tree and emit one
/// `path|digest|size` line per file, paths relative with forward slashes,
/// sorted for deterministic output.
fn write_manifest(dir: &Path, out: &Path) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    for ent in WalkDir::new(dir).min_depth(1) {
        let ent = ent?;
        if ent.file_type().is_file() {
            files.push(ent.path().to_path_buf());
        }
    }
    files.sort();

    let mut w = BufWriter::new(File::create(out).with_context(|| format!("create {}", out.display()))?);
    let mut count = 0u64;
    for path in &files {
        let rel = path.strip_prefix(dir)?.to_string_lossy().replace('\\', "/");
        if rel.contains(FIELD_SEP) {
            bail!("path {rel:?} contains the manifest delimiter {FIELD_SEP:?}");
        }
        let digest = hash::digest(path);
        if digest.is_empty() {
            bail!("unreadable file {}", path.display());
        }
        let size = path.metadata()?.len();
        writeln!(w, "{rel}{FIELD_SEP}{digest}{FIELD_SEP}{size}")?;
        count += 1;
    }
    w.flush()?;
    info!(count, out = %out.display(), "manifest written");
    println!("{count} entries");
    Ok(())
}
