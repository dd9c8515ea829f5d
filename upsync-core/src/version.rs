use crate::error::{Result, UpdateError};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Local version marker filename inside the state directory.
pub const MARKER_FILE: &str = "version.txt";

/// Release version in `major.minor.patch` form. Accepts an optional leading
/// `v` and ignores a pre-release tail after `-` for ordering, matching the
/// tags the releases API hands out (`v1.4.0-alpha`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for Version {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);
        let s = s.split('-').next().unwrap_or(s);
        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() != 3 {
            return Err(UpdateError::Version(format!(
                "expected major.minor.patch, got {s:?}"
            )));
        }
        let num = |p: &str| {
            p.parse::<u64>()
                .map_err(|_| UpdateError::Version(format!("bad component {p:?} in {s:?}")))
        };
        Ok(Version { major: num(parts[0])?, minor: num(parts[1])?, patch: num(parts[2])? })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Currently-installed version string, or `None` before the first successful
/// check.
pub fn read_marker(state_dir: &Path) -> Result<Option<String>> {
    let path = state_dir.join(MARKER_FILE);
    match std::fs::read_to_string(&path) {
        Ok(s) => Ok(Some(s.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Advance the installed-version marker. Written via temp file + rename so an
/// interrupted write can't leave a half-written marker; called only after
/// every pending file has been fetched.
pub fn write_marker(state_dir: &Path, version: &str) -> Result<()> {
    std::fs::create_dir_all(state_dir)?;
    let tmp = state_dir.join(".version.txt.tmp");
    std::fs::write(&tmp, format!("{version}\n"))?;
    std::fs::rename(&tmp, state_dir.join(MARKER_FILE))?;
    Ok(())
}
