//! Filesystem-backed [`crate::storage::BlobStore`]. Uploaded bytes live
//! under `<blob_root>/uploads/` named
//! `<document_id>_<safe_filename>`; the validator has already rejected path
//! traversal and control characters in `safe_filename` by the time this is
//! called, so no further sanitization happens here beyond refusing an
//! empty name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{CoreError, CoreResult};
use crate::storage::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    fn resolve(&self, blob_path: &str) -> CoreResult<PathBuf> {
        let candidate = self.root.join(blob_path);
        if blob_path.contains("..") {
            return Err(CoreError::ValidationRejected(
                "blob path must not contain '..'".to_string(),
            ));
        }
        Ok(candidate)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, document_id: &str, safe_filename: &str, bytes: &[u8]) -> CoreResult<String> {
        if safe_filename.is_empty() {
            return Err(CoreError::ValidationRejected("filename must not be empty".to_string()));
        }
        let dir = self.uploads_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CoreError::internal(format!("failed to create upload directory: {e}")))?;

        let file_name = format!("{document_id}_{safe_filename}");
        let full_path = dir.join(&file_name);

        let mut file = tokio::fs::File::create(&full_path)
            .await
            .map_err(|e| CoreError::internal(format!("failed to create blob file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| CoreError::internal(format!("failed to write blob file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| CoreError::internal(format!("failed to flush blob file: {e}")))?;

        let relative = Path::new("uploads").join(&file_name);
        Ok(relative.to_string_lossy().into_owned())
    }

    async fn get(&self, blob_path: &str) -> CoreResult<Vec<u8>> {
        let full_path = self.resolve(blob_path)?;
        tokio::fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::not_found(format!("blob not found: {blob_path}"))
            } else {
                CoreError::internal(format!("failed to read blob: {e}"))
            }
        })
    }

    async fn delete(&self, blob_path: &str) -> CoreResult<()> {
        let full_path = self.resolve(blob_path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::internal(format!("failed to delete blob: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = store.put("doc-1", "manual.pdf", b"hello world").await.unwrap();
        assert!(path.starts_with("uploads/"));
        let bytes = store.get(&path).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.get("uploads/does-not-exist").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let path = store.put("doc-1", "a.txt", b"x").await.unwrap();
        store.delete(&path).await.unwrap();
        store.delete(&path).await.unwrap();
        assert!(store.get(&path).await.is_err());
    }

    #[tokio::test]
    async fn rejects_path_traversal_in_blob_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        let err = store.get("../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ValidationRejected);
    }
}
