use crate::error::{Result, UpdateError};
use std::path::{Component, Path, PathBuf};

/// Validate a manifest- or journal-relative path before joining it onto the
/// install root: no absolute paths, no `..` traversal. Backslashes are
/// normalized to forward slashes first since manifests published from Windows
/// build machines use them.
pub fn validate_rel_path(rel: &str) -> Result<PathBuf> {
    let normalized = rel.replace('\\', "/");
    let p = Path::new(&normalized);
    if p.is_absolute() || normalized.starts_with('/') {
        return Err(UpdateError::PathUnsafe(format!("absolute path not allowed: {rel:?}")));
    }
    for comp in p.components() {
        match comp {
            Component::ParentDir => {
                return Err(UpdateError::PathUnsafe(format!("parent traversal not allowed: {rel:?}")))
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(UpdateError::PathUnsafe(format!("rooted path not allowed: {rel:?}")))
            }
            _ => {}
        }
    }
    Ok(PathBuf::from(normalized))
}
