use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const COPY_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("http {status} for {key}")]
    Status { status: u16, key: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The single-object transfer primitive the engine consumes.
///
/// Streams one object to `dest`, invoking `on_bytes` with the cumulative byte
/// count transferred so far *for this object*. Session-wide aggregation is
/// the download orchestrator's job, not the store's.
pub trait ObjectStore {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError> {
        (**self).get(key, dest, on_bytes)
    }
}

/// HTTP-backed store: `GET {endpoint}/{bucket}/{key}`, response body streamed
/// straight to disk.
pub struct HttpStore {
    client: reqwest::blocking::Client,
    endpoint: String,
    bucket: String,
}

impl HttpStore {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self, StoreError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Transport(format!("client init: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        })
    }
}

impl ObjectStore for HttpStore {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        debug!(%url, "GET");
        let mut resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| StoreError::Transport(format!("{url}: {e}")))?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(StoreError::Status { status: status.as_u16(), key: key.to_string() });
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = resp
                .read(&mut buf)
                .map_err(|e| StoreError::Transport(format!("{url}: {e}")))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            transferred += n as u64;
            on_bytes(transferred);
        }
        Ok(())
    }
}

/// Directory-backed store for LAN mirrors and tests: the object key is a path
/// under the mirror root.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ObjectStore for DirStore {
    fn get(
        &self,
        key: &str,
        dest: &Path,
        on_bytes: &mut dyn FnMut(u64),
    ) -> Result<(), StoreError> {
        let src = self.root.join(key);
        let mut f = match File::open(&src) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(dest)?;
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut transferred = 0u64;
        loop {
            let n = f.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            transferred += n as u64;
            on_bytes(transferred);
        }
        Ok(())
    }
}
