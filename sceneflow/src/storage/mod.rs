//! Blob storage seam: opaque handles, uploads, shareable URLs.
//!
//! The engine never touches object-store wire mechanics; it only needs to
//! put bytes somewhere durable and mint a time-limited URL it can hand to
//! the downstream AI services. A local-disk store covers single-node
//! deployments, an in-memory store covers tests.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::errors::PipelineError;

/// Opaque handle to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wraps a raw storage handle.
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The raw handle string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage collaborator used by the edit stage and the submission path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores raw bytes under a fresh random name.
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, PipelineError>;

    /// Mints a URL for the blob that stays valid for `ttl`.
    async fn shareable_url(
        &self,
        blob: &BlobRef,
        ttl: Duration,
    ) -> Result<String, PipelineError>;

    /// Decodes a base64 payload and stores it.
    ///
    /// Uploads arrive base64-encoded from the submission surface; a payload
    /// that does not decode is a caller error, not a transient fault.
    async fn put_base64(&self, content: &str) -> Result<BlobRef, PipelineError> {
        let bytes = BASE64
            .decode(content.trim())
            .map_err(|err| PipelineError::Decode(err.to_string()))?;
        self.put(&bytes).await
    }
}

/// Blob store backed by a local directory.
///
/// Objects are written under random UUIDv4 names; the handle is the full
/// file path.
#[derive(Debug, Clone)]
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    /// Creates a store rooted at `root`. The directory is created lazily
    /// on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this store writes into.
    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalDiskStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, PipelineError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let name = Uuid::new_v4().to_string();
        let path = self.root.join(&name);
        debug!(path = %path.display(), size = bytes.len(), "writing blob");
        tokio::fs::write(&path, bytes).await?;

        Ok(BlobRef::new(path.to_string_lossy()))
    }

    async fn shareable_url(
        &self,
        blob: &BlobRef,
        ttl: Duration,
    ) -> Result<String, PipelineError> {
        if !tokio::fs::try_exists(blob.as_str()).await? {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no blob at {blob}"),
            )));
        }
        Ok(format!("file://{}?expires={}", blob, ttl.as_secs()))
    }
}

/// In-memory blob store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetches stored bytes, if the handle is known.
    #[must_use]
    pub fn get(&self, blob: &BlobRef) -> Option<Vec<u8>> {
        self.blobs.get(blob.as_str()).map(|entry| entry.clone())
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef, PipelineError> {
        let name = Uuid::new_v4().to_string();
        self.blobs.insert(name.clone(), bytes.to_vec());
        Ok(BlobRef::new(name))
    }

    async fn shareable_url(
        &self,
        blob: &BlobRef,
        ttl: Duration,
    ) -> Result<String, PipelineError> {
        if !self.blobs.contains_key(blob.as_str()) {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no blob {blob}"),
            )));
        }
        Ok(format!("mem://{}?expires={}", blob, ttl.as_secs()))
    }
}
