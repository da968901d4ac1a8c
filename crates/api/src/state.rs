use std::sync::Arc;

use quboflow_events::JobBus;
use quboflow_worker::JobRunner;

use crate::engine::{JobDispatcher, JobRegistry};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Per-job progress channels.
    pub bus: Arc<JobBus>,
    pub registry: Arc<JobRegistry>,
    pub dispatcher: JobDispatcher,
    /// Runs the synchronous `/solve` endpoint outside the worker pool.
    pub runner: Arc<JobRunner>,
}
