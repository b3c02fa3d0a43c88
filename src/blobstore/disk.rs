//! Local-disk blob store.
//!
//! Default backend for development and tests: payloads live directly under
//! `base_path/{storage_key}`. Writes go through a temp file with fsync and
//! an atomic rename so a crash never leaves a half-written payload at the
//! final key.

use super::{BlobError, BlobResult, BlobStore};
use bytes::Bytes;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct DiskBlobStore {
    base_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Defense in depth: keys are derived upstream and should already be
    /// safe, but a key that escapes the base directory is rejected here too.
    fn resolve(&self, key: &str) -> BlobResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|seg| seg.is_empty() || seg == "..")
            || key.bytes().any(|b| b.is_ascii_control() || b == b'\\')
        {
            return Err(BlobError::Permanent(io::Error::new(
                ErrorKind::InvalidInput,
                format!("unsafe storage key `{}`", key),
            )));
        }
        Ok(self.base_path.join(key))
    }

    /// Remove empty directories left behind by a delete, up to the base.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

impl BlobStore for DiskBlobStore {
    async fn put(&self, key: &str, payload: Bytes) -> BlobResult<()> {
        let file_path = self.resolve(key)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                BlobError::Permanent(io::Error::new(
                    ErrorKind::InvalidInput,
                    "storage key has no parent directory",
                ))
            })?;
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| BlobError::classify(e, key))?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&payload).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &file_path).await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(BlobError::classify(err, key))
            }
        }
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        let file_path = self.resolve(key)?;
        fs::read(&file_path)
            .await
            .map(Bytes::from)
            .map_err(|e| BlobError::classify(e, key))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let file_path = self.resolve(key)?;
        match fs::remove_file(&file_path).await {
            Ok(()) => {
                debug!("removed payload {}", file_path.display());
                if let Some(parent) = file_path.parent() {
                    self.prune_empty_dirs(parent).await;
                }
                Ok(())
            }
            Err(err) => Err(BlobError::classify(err, key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_returns_identical_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlobStore::new(tmp.path());

        store
            .put("users/7/20250101_abc_doc.pdf", Bytes::from_static(b"%PDF-1.4 test"))
            .await
            .unwrap();
        let read = store.get("users/7/20250101_abc_doc.pdf").await.unwrap();
        assert_eq!(read.as_ref(), b"%PDF-1.4 test");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlobStore::new(tmp.path());

        match store.get("users/1/missing.pdf").await {
            Err(BlobError::NotFound(key)) => assert_eq!(key, "users/1/missing.pdf"),
            other => panic!("expected NotFound, got {:?}", other.map(|b| b.len())),
        }
    }

    #[tokio::test]
    async fn traversal_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlobStore::new(tmp.path());

        let err = store
            .put("users/7/../../etc/passwd", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Permanent(_)));
    }

    #[tokio::test]
    async fn delete_prunes_empty_directories() {
        let tmp = TempDir::new().unwrap();
        let store = DiskBlobStore::new(tmp.path());

        store
            .put("users/9/nested/file.csv", Bytes::from_static(b"a,b\n"))
            .await
            .unwrap();
        store.delete("users/9/nested/file.csv").await.unwrap();
        assert!(!tmp.path().join("users").exists());
    }
}
