//! Object store backends.
//!
//! Both backends hand out a [`ChunkStream`] so callers can bound peak memory
//! when copying large datasets.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;

use crate::error::StorageError;

/// Size of the chunks produced when streaming an artifact (1 MiB).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// A stream of artifact chunks, each at most [`CHUNK_SIZE`] bytes.
pub type ChunkStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Read access to a bucket/path object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Open the object for streamed reading.
    async fn open(&self, bucket: &str, path: &str) -> Result<ChunkStream, StorageError>;
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Objects stored as files under `<root>/<bucket>/<path>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, bucket: &str, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(bucket).join(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidLocation(format!("{bucket}/{path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn open(&self, bucket: &str, path: &str) -> Result<ChunkStream, StorageError> {
        let full = self.resolve(bucket, path)?;
        let file = match tokio::fs::File::open(&full).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(format!("{bucket}/{path}")));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };
        Ok(ReaderStream::with_capacity(file, CHUNK_SIZE)
            .map_err(StorageError::Io)
            .boxed())
    }
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Objects stored in S3 or an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a client from the default AWS credential chain.
    ///
    /// An `endpoint_url` targets an S3-compatible service (MinIO, R2, ...) and
    /// switches to path-style addressing.
    pub async fn from_env(endpoint_url: Option<String>) -> Self {
        let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&cfg);
        if let Some(url) = endpoint_url {
            builder = builder.endpoint_url(url).force_path_style(true);
        }
        Self::new(aws_sdk_s3::Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn open(&self, bucket: &str, path: &str) -> Result<ChunkStream, StorageError> {
        let location = format!("{bucket}/{path}");
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(path)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(se) if se.is_no_such_key() => StorageError::NotFound(location.clone()),
                _ => StorageError::Transport {
                    location: location.clone(),
                    message: DisplayErrorContext(&err).to_string(),
                },
            })?;

        Ok(
            ReaderStream::with_capacity(out.body.into_async_read(), CHUNK_SIZE)
                .map_err(StorageError::Io)
                .boxed(),
        )
    }
}
