use crate::error::{Result, UpdateError};
use crate::manifest::FIELD_SEP;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Lines, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Static prefix of the footer line. Bumping the version invalidates every
/// journal written by older builds on next open.
pub const SIGNATURE_PREFIX: &str = "Checksum v1.0";
/// Journal filename inside the state directory.
pub const JOURNAL_FILE: &str = "pending.txt";
const FOOTER_SEP: &str = " | ";

/// One file still to fetch, as recorded in the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub rel_path: String,
    pub size: u64,
}

/// Durable pending-set for one remote version.
///
/// Layout is line-oriented text: a header line holding the remote version,
/// one `path|size` line per file to fetch, and a footer
/// `Checksum v1.0 | <total-bytes>` written only once the scan has fully
/// completed. The footer doubles as the crash marker: a journal without it is
/// the leftover of an interrupted scan and is discarded on the next open.
///
/// The open file handle holds an exclusive lock for the whole session, which
/// is what rejects a second concurrent check against the same state dir.
pub struct Journal {
    path: PathBuf,
    file: File,
    remote_version: String,
    total_bytes: u64,
    resumed: bool,
}

impl Journal {
    /// Open the journal for `remote_version`, validating any existing file.
    ///
    /// An existing file is reusable iff it has at least two lines, its header
    /// equals `remote_version`, and its footer carries the expected signature
    /// prefix. Anything else (missing footer, other version, garbage) is the
    /// product of an interrupted or stale run: the file is truncated and the
    /// caller must scan from scratch. On resume the footer's recorded total
    /// becomes the download-progress denominator.
    pub fn open_or_create(state_dir: &Path, remote_version: &str) -> Result<Journal> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(JOURNAL_FILE);
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(UpdateError::SessionBusy);
        }

        let mut journal = Journal {
            path,
            file,
            remote_version: remote_version.to_string(),
            total_bytes: 0,
            resumed: false,
        };
        match journal.validate()? {
            Some(total) => {
                debug!(total, "resuming completed journal, skipping scan");
                journal.total_bytes = total;
                journal.resumed = true;
            }
            None => journal.reset()?,
        }
        Ok(journal)
    }

    /// Returns `Some(total_bytes)` when the on-disk content is a complete
    /// journal for the current remote version.
    fn validate(&mut self) -> Result<Option<u64>> {
        let mut text = String::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_string(&mut text)?;
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() < 2 {
            return Ok(None);
        }
        if lines[0] != self.remote_version {
            warn!(found = lines[0], want = %self.remote_version, "journal is for another version, discarding");
            return Ok(None);
        }
        let footer = lines[lines.len() - 1];
        let Some((prefix, total)) = footer.split_once(FOOTER_SEP) else {
            return Ok(None);
        };
        if prefix != SIGNATURE_PREFIX {
            warn!(footer, "journal footer signature mismatch, discarding");
            return Ok(None);
        }
        match total.trim().parse::<u64>() {
            Ok(t) => Ok(Some(t)),
            Err(_) => Ok(None),
        }
    }

    /// Truncate in place. Reusing the locked handle keeps the session lock
    /// continuous across discard-and-rebuild.
    fn reset(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.total_bytes = 0;
        self.resumed = false;
        Ok(())
    }

    /// True when a completed prior journal was found and the scan can be
    /// skipped entirely.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// Running (or, after resume, recorded) sum of pending entry sizes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First write of a fresh journal; called once, before any entries.
    pub fn write_header(&mut self) -> Result<()> {
        writeln!(&self.file, "{}", self.remote_version)?;
        self.file.flush()?;
        Ok(())
    }

    /// Record one file to fetch. Flushed per line so an interrupted scan
    /// leaves at worst a footerless (hence discardable) journal.
    pub fn append_entry(&mut self, rel_path: &str, size: u64) -> Result<()> {
        writeln!(&self.file, "{}{}{}", rel_path, FIELD_SEP, size)?;
        self.file.flush()?;
        self.total_bytes += size;
        Ok(())
    }

    /// Seal the journal with the footer. Must be the last write of a
    /// successful scan; its absence is exactly what invalidates the file on
    /// the next open.
    pub fn finalize(&mut self) -> Result<()> {
        writeln!(&self.file, "{}{}{}", SIGNATURE_PREFIX, FOOTER_SEP, self.total_bytes)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Iterate the recorded entries in append order, header skipped, footer
    /// exclusive. Reads through a separate handle; the session lock stays on
    /// the writing handle.
    pub fn drain(&self) -> Result<Drain> {
        let f = File::open(&self.path)?;
        let mut lines = BufReader::new(f).lines();
        let _header = lines.next().transpose()?;
        Ok(Drain { lines, line_no: 1 })
    }

    /// Delete the journal after a fully successful drain so the next check
    /// starts from a clean scan. A failed session must not call this: the
    /// file on disk is what makes the retry cheap.
    pub fn remove(self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

pub struct Drain {
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl Iterator for Drain {
    type Item = Result<PendingFile>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = match self.lines.next()? {
            Ok(l) => l,
            Err(e) => return Some(Err(e.into())),
        };
        self.line_no += 1;
        if line.starts_with(SIGNATURE_PREFIX) {
            return None;
        }
        let Some((rel_path, size)) = line.rsplit_once(FIELD_SEP) else {
            return Some(Err(UpdateError::JournalFormat(format!(
                "line {}: missing size field",
                self.line_no
            ))));
        };
        match size.trim().parse::<u64>() {
            Ok(size) => Some(Ok(PendingFile { rel_path: rel_path.to_string(), size })),
            Err(_) => Some(Err(UpdateError::JournalFormat(format!(
                "line {}: bad size {:?}",
                self.line_no, size
            )))),
        }
    }
}
