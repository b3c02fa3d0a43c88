//! The narrow interface to the external blob store.
//!
//! The gateway is a policy and bookkeeping layer; durable byte storage is
//! someone else's problem behind `put`/`get`/`delete`. Errors are
//! classified so the gateway knows which failures are worth retrying.

use bytes::Bytes;
use std::io;
use thiserror::Error;

pub mod disk;

pub use disk::DiskBlobStore;

#[derive(Debug, Error)]
pub enum BlobError {
    /// No payload under this key.
    #[error("no payload stored under `{0}`")]
    NotFound(String),
    /// Transient backend failure (network, timeout). Safe to retry.
    #[error("transient blob store failure: {0}")]
    Transient(#[source] io::Error),
    /// Anything else. Treated as permanent unless the backend says otherwise.
    #[error("blob store failure: {0}")]
    Permanent(#[source] io::Error),
}

impl BlobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobError::Transient(_))
    }

    /// Classify an I/O error from a backend call against `key`.
    pub fn classify(err: io::Error, key: &str) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            NotFound => BlobError::NotFound(key.to_string()),
            TimedOut | Interrupted | ConnectionReset | ConnectionAborted | BrokenPipe
            | WouldBlock => BlobError::Transient(err),
            _ => BlobError::Permanent(err),
        }
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// External blob store: put/get/delete, nothing else.
///
/// Implementations must treat `key` as an opaque, already-derived storage
/// key; ownership checks happen upstream against metadata, never here.
pub trait BlobStore: Send + Sync + 'static {
    fn put(&self, key: &str, payload: Bytes) -> impl Future<Output = BlobResult<()>> + Send;
    fn get(&self, key: &str) -> impl Future<Output = BlobResult<Bytes>> + Send;
    fn delete(&self, key: &str) -> impl Future<Output = BlobResult<()>> + Send;
}
