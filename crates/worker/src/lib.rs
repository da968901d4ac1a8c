//! Job execution for quboflow workers.
//!
//! [`JobRunner`] wires the artifact fetcher, environment provisioner, plugin
//! loader and execution engine into one pipeline and turns its outcome into
//! exactly one terminal event per job.

pub mod config;
pub mod result;
pub mod runner;

pub use config::{StorageBackend, WorkerConfig};
pub use runner::{Artifact, JobRunner, SolveRequest};
