//! Blob storage.
//!
//! Materializes audio content referenced by a record URI into lifecycle-scoped
//! scratch files and removes them again once the message is done.

mod http;
mod local;
mod scratch;

pub use http::HttpBlobStore;
pub use local::LocalBlobStore;
pub use scratch::ScratchSpace;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::Path;

/// Transfers blobs to local files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copy the blob at `uri` to `dest`, creating parent directories.
    ///
    /// Returns the number of bytes written.
    async fn download(&self, uri: &str, dest: &Path) -> Result<u64>;

    /// Remove a previously downloaded file. Removing a missing file succeeds.
    async fn delete(&self, path: &Path) -> Result<()>;
}

/// URI scheme, as far as blob routing cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobScheme {
    /// `file://` URI or bare filesystem path.
    Local,
    Http,
}

impl BlobScheme {
    pub fn of(uri: &str) -> Result<Self> {
        match uri.split_once("://") {
            None => Ok(BlobScheme::Local),
            Some((scheme, _)) => match scheme.to_ascii_lowercase().as_str() {
                "file" => Ok(BlobScheme::Local),
                "http" | "https" => Ok(BlobScheme::Http),
                other => bail!("Unsupported blob URI scheme '{}' in {}", other, uri),
            },
        }
    }
}

/// Routes each URI to the local or HTTP store by scheme.
pub struct DefaultBlobStore {
    local: LocalBlobStore,
    http: HttpBlobStore,
}

impl DefaultBlobStore {
    pub fn new(http_timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            local: LocalBlobStore,
            http: HttpBlobStore::new(http_timeout_secs)?,
        })
    }
}

#[async_trait]
impl BlobStore for DefaultBlobStore {
    async fn download(&self, uri: &str, dest: &Path) -> Result<u64> {
        match BlobScheme::of(uri)? {
            BlobScheme::Local => self.local.download(uri, dest).await,
            BlobScheme::Http => self.http.download(uri, dest).await,
        }
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.local.delete(path).await
    }
}
