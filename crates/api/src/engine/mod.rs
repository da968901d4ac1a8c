//! Job execution engine.
//!
//! The registry holds every job record; the dispatcher queues submissions
//! and runs them on a fixed pool of worker tasks.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchError, DispatcherOptions, JobDispatcher, WorkerPool};
pub use registry::JobRegistry;
