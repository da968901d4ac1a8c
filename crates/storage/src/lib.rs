//! Artifact retrieval for solver jobs: storage locations, object store
//! backends (local filesystem and S3) and signed-URL downloads.

pub mod error;
pub mod fetcher;
pub mod location;
pub mod store;

pub use error::StorageError;
pub use fetcher::{ArtifactFetcher, ScopedArtifact};
pub use location::StorageLocation;
pub use store::{ChunkStream, LocalObjectStore, ObjectStore, S3ObjectStore, CHUNK_SIZE};
