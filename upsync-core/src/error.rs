use crate::store::StoreError;
use thiserror::Error;

/// Session-terminating failures. Everything absorbable (a missing local file,
/// a single failed fetch) is handled where it occurs and never reaches this
/// enum; see `reconcile::CheckReport` for per-file fetch failures.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("manifest line {line_no}: {reason}")]
    ManifestParse { line_no: u64, reason: String },

    #[error("journal: {0}")]
    JournalFormat(String),

    #[error("unsafe relative path: {0}")]
    PathUnsafe(String),

    #[error("another check is already running against this state directory")]
    SessionBusy,

    #[error("check cancelled")]
    Cancelled,

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("version marker: {0}")]
    Version(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
