//! Artifact retrieval.
//!
//! [`ArtifactFetcher`] resolves a [`StorageLocation`] against either the
//! configured [`ObjectStore`] or plain HTTP (signed URLs), and returns the
//! bytes whole, as a bounded chunk stream, or spooled into a
//! [`ScopedArtifact`] temporary file.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::location::StorageLocation;
use crate::store::{ChunkStream, ObjectStore, CHUNK_SIZE};

/// Fetches solver code, manifests and datasets.
#[derive(Clone)]
pub struct ArtifactFetcher {
    store: Arc<dyn ObjectStore>,
    http: reqwest::Client,
}

impl ArtifactFetcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_http_client(store, reqwest::Client::new())
    }

    pub fn with_http_client(store: Arc<dyn ObjectStore>, http: reqwest::Client) -> Self {
        Self { store, http }
    }

    /// Open `location` as a stream of chunks no larger than [`CHUNK_SIZE`].
    pub async fn stream(&self, location: &StorageLocation) -> Result<ChunkStream, StorageError> {
        match location {
            StorageLocation::Object { bucket, path } => self.store.open(bucket, path).await,
            StorageLocation::SignedUrl(url) => self.open_url(location, url).await,
        }
    }

    /// Download the whole artifact into memory.
    ///
    /// An empty artifact is an error.
    pub async fn fetch(&self, location: &StorageLocation) -> Result<Bytes, StorageError> {
        let mut chunks = self.stream(location).await?;
        let mut buf = Vec::new();
        let mut hasher = Sha256::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            buf.extend_from_slice(&chunk);
        }
        self.finish(location, buf.len() as u64, hasher)?;
        Ok(Bytes::from(buf))
    }

    /// Like [`fetch`](Self::fetch), but a missing object yields `None`.
    pub async fn fetch_optional(
        &self,
        location: &StorageLocation,
    ) -> Result<Option<Bytes>, StorageError> {
        match self.fetch(location).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stream the artifact into a temporary file that is deleted on drop.
    pub async fn fetch_to_temp(
        &self,
        location: &StorageLocation,
    ) -> Result<ScopedArtifact, StorageError> {
        let named = tempfile::Builder::new()
            .prefix("quboflow-")
            .suffix(&format!("-{}", location.file_name()))
            .tempfile()?;
        let mut out = tokio::fs::File::from_std(named.as_file().try_clone()?);

        let mut chunks = self.stream(location).await?;
        let mut len = 0u64;
        let mut hasher = Sha256::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            out.write_all(&chunk).await?;
            len += chunk.len() as u64;
        }
        out.flush().await?;

        let sha256 = self.finish(location, len, hasher)?;
        Ok(ScopedArtifact {
            file: named,
            len,
            sha256,
        })
    }

    async fn open_url(
        &self,
        location: &StorageLocation,
        url: &str,
    ) -> Result<ChunkStream, StorageError> {
        let transport = |message: String| StorageError::Transport {
            location: location.to_string(),
            message,
        };

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(location.to_string()));
        }
        if !status.is_success() {
            return Err(transport(format!("HTTP {status}")));
        }

        let display = location.to_string();
        Ok(resp
            .bytes_stream()
            .map_err(move |e| StorageError::Transport {
                location: display.clone(),
                message: e.to_string(),
            })
            .map_ok(|chunk| {
                stream::iter(
                    split_chunk(chunk)
                        .into_iter()
                        .map(Ok::<Bytes, StorageError>),
                )
            })
            .try_flatten()
            .boxed())
    }

    fn finish(
        &self,
        location: &StorageLocation,
        len: u64,
        hasher: Sha256,
    ) -> Result<String, StorageError> {
        if len == 0 {
            return Err(StorageError::Empty(location.to_string()));
        }
        let sha256 = format!("{:x}", hasher.finalize());
        tracing::info!(
            location = %location,
            backend = self.backend(location),
            bytes = len,
            sha256 = %sha256,
            "Fetched artifact",
        );
        Ok(sha256)
    }

    fn backend(&self, location: &StorageLocation) -> &'static str {
        match location {
            StorageLocation::Object { .. } => self.store.name(),
            StorageLocation::SignedUrl(_) => "http",
        }
    }
}

/// Split an oversized network chunk into [`CHUNK_SIZE`] slices.
fn split_chunk(chunk: Bytes) -> Vec<Bytes> {
    if chunk.len() <= CHUNK_SIZE {
        return vec![chunk];
    }
    (0..chunk.len())
        .step_by(CHUNK_SIZE)
        .map(|start| chunk.slice(start..(start + CHUNK_SIZE).min(chunk.len())))
        .collect()
}

// ---------------------------------------------------------------------------
// Scoped temporary artifact
// ---------------------------------------------------------------------------

/// An artifact spooled to disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct ScopedArtifact {
    file: NamedTempFile,
    len: u64,
    sha256: String,
}

impl ScopedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex-encoded SHA-256 of the contents.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub async fn read(&self) -> Result<Vec<u8>, StorageError> {
        Ok(tokio::fs::read(self.path()).await?)
    }
}
