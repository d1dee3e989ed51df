//! Blobs already reachable through the local filesystem.

use super::BlobStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Copies `file://` URIs and bare paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBlobStore;

impl LocalBlobStore {
    fn source_path(uri: &str) -> PathBuf {
        PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<u64> {
        let source = Self::source_path(uri);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create parent directories")?;
        }

        fs::copy(&source, dest)
            .await
            .with_context(|| format!("Failed to copy {:?} to {:?}", source, dest))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {:?}", path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_source_path() {
        assert_eq!(
            LocalBlobStore::source_path("file:///clips/a1.mp3"),
            PathBuf::from("/clips/a1.mp3")
        );
        assert_eq!(
            LocalBlobStore::source_path("clips/a1.mp3"),
            PathBuf::from("clips/a1.mp3")
        );
    }

    #[tokio::test]
    async fn test_download_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("a1.mp3");
        tokio::fs::write(&source, b"0123456789").await.unwrap();
        let dest = temp_dir.path().join("scratch/run/a1.mp3");

        let bytes = LocalBlobStore
            .download(source.to_str().unwrap(), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 10);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_download_missing_source_fails() {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("out.mp3");

        let result = LocalBlobStore.download("/does/not/exist.mp3", &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.mp3");
        tokio::fs::write(&path, b"x").await.unwrap();

        LocalBlobStore.delete(&path).await.unwrap();
        LocalBlobStore.delete(&path).await.unwrap();

        assert!(!path.exists());
    }
}
