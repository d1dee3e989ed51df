//! Blobs served over HTTP(S).

use super::local::LocalBlobStore;
use super::BlobStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Streams `http://` and `https://` URIs to disk.
pub struct HttpBlobStore {
    client: reqwest::Client,
}

impl HttpBlobStore {
    /// Create a store whose requests time out after `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(uri)
            .send()
            .await
            .with_context(|| format!("Failed to connect for download of {}", uri))?;

        if !response.status().is_success() {
            anyhow::bail!("Download of {} failed with status: {}", uri, response.status());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create parent directories")?;
        }

        let mut file = File::create(dest)
            .await
            .context("Failed to create destination file")?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read response body")?
        {
            file.write_all(&chunk)
                .await
                .context("Failed to write to file")?;
            written += chunk.len() as u64;
        }

        file.flush().await.context("Failed to flush file")?;

        Ok(written)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        LocalBlobStore.delete(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tempfile::TempDir;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_download_streams_body() {
        let base = serve(Router::new().route("/clips/a1.mp3", get(|| async { "fake audio bytes" }))).await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("run/a1.mp3");
        let store = HttpBlobStore::new(5).unwrap();

        let bytes = store
            .download(&format!("{}/clips/a1.mp3", base), &dest)
            .await
            .unwrap();

        assert_eq!(bytes, 16);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"fake audio bytes");
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let base = serve(Router::new().route(
            "/clips/a1.mp3",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("a1.mp3");
        let store = HttpBlobStore::new(5).unwrap();

        let err = store
            .download(&format!("{}/clips/a1.mp3", base), &dest)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
    }
}
