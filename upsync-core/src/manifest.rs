use crate::error::{Result, UpdateError};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Field delimiter for manifest and journal entry lines. Paths containing it
/// cannot be represented; the format defines no escaping.
pub const FIELD_SEP: char = '|';

/// One manifest line: `<relative-path>|<hex-digest>|<size-bytes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub rel_path: String,
    pub digest_hex: String,
    pub size: u64,
}

/// Lazy reader over a checksum manifest. Restartable only by reopening.
pub struct ManifestReader {
    lines: Lines<BufReader<File>>,
    line_no: u64,
}

impl ManifestReader {
    pub fn open(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        Ok(Self { lines: BufReader::new(f).lines(), line_no: 0 })
    }

    /// Number of entry lines, for the scan-progress denominator. Reads the
    /// whole file once; the manifest itself is re-read lazily afterwards.
    pub fn count_lines(path: &Path) -> Result<u64> {
        let f = File::open(path)?;
        let mut n = 0u64;
        for line in BufReader::new(f).lines() {
            if !line?.trim().is_empty() {
                n += 1;
            }
        }
        Ok(n)
    }
}

impl Iterator for ManifestReader {
    type Item = Result<ManifestEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            // Text manifests commonly end with a newline; skip blank lines.
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_line(&line, self.line_no));
        }
    }
}

/// A malformed line is fatal for the whole check: skipping it would silently
/// desynchronize total-size accounting against the published manifest.
fn parse_line(line: &str, line_no: u64) -> Result<ManifestEntry> {
    let fields: Vec<&str> = line.split(FIELD_SEP).collect();
    if fields.len() != 3 {
        return Err(UpdateError::ManifestParse {
            line_no,
            reason: format!("expected 3 fields, got {}", fields.len()),
        });
    }
    let size: u64 = fields[2].trim().parse().map_err(|_| UpdateError::ManifestParse {
        line_no,
        reason: format!("bad size {:?}", fields[2]),
    })?;
    Ok(ManifestEntry {
        rel_path: fields[0].to_string(),
        digest_hex: fields[1].to_string(),
        size,
    })
}
