//! The job pipeline: fetch, provision, load, bind, load dataset, execute,
//! shape.
//!
//! [`JobRunner`] owns no per-job state. Everything a job acquires (the
//! environment, temporary files, the loaded plugin) lives in locals of
//! [`JobRunner::execute`] and is released when it returns, whichever stage
//! failed.

use std::sync::Arc;

use quboflow_core::binding::bind;
use quboflow_core::dataset::{load_matrix, BatchPolicy};
use quboflow_core::error::CoreError;
use quboflow_core::job::Job;
use quboflow_core::messages::{FinalEvent, ProgressEvent};
use quboflow_core::types::Parameters;
use quboflow_events::JobBus;
use quboflow_pipeline::{
    execute, ExecutionOutput, PluginLoader, ProgressFn, Provisioner, PythonPluginLoader,
    VenvProvisioner,
};
use quboflow_storage::{
    ArtifactFetcher, LocalObjectStore, ObjectStore, S3ObjectStore, StorageError, StorageLocation,
};
use serde_json::Value;
use tracing::Instrument;

use crate::config::{StorageBackend, WorkerConfig};
use crate::result::{flatten_output, shape_output};

/// A solver or dataset, either stored or supplied inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A storage reference, see [`StorageLocation::parse`].
    Reference(String),
    Inline(Vec<u8>),
}

/// Everything one execution needs.
#[derive(Debug, Clone)]
pub struct SolveRequest {
    pub solver: Artifact,
    pub dataset: Artifact,
    pub parameters: Parameters,
}

impl SolveRequest {
    pub fn for_job(job: &Job) -> Self {
        Self {
            solver: Artifact::Reference(job.solver_reference.clone()),
            dataset: Artifact::Reference(job.dataset_reference.clone()),
            parameters: job.parameters.clone(),
        }
    }
}

/// Runs solver jobs end to end.
#[derive(Clone)]
pub struct JobRunner {
    fetcher: ArtifactFetcher,
    provisioner: Arc<dyn Provisioner>,
    loader: Arc<dyn PluginLoader>,
    batching: BatchPolicy,
}

impl JobRunner {
    pub fn new(
        fetcher: ArtifactFetcher,
        provisioner: Arc<dyn Provisioner>,
        loader: Arc<dyn PluginLoader>,
        batching: BatchPolicy,
    ) -> Self {
        Self {
            fetcher,
            provisioner,
            loader,
            batching,
        }
    }

    /// Build the production pipeline: configured object store, venv
    /// provisioner and the Python plugin host.
    pub async fn from_config(config: &WorkerConfig) -> Self {
        let store: Arc<dyn ObjectStore> = match &config.storage {
            StorageBackend::Local { root } => Arc::new(LocalObjectStore::new(root.clone())),
            StorageBackend::S3 { endpoint_url } => {
                Arc::new(S3ObjectStore::from_env(endpoint_url.clone()).await)
            }
        };
        tracing::info!(backend = store.name(), "Object store configured");

        Self::new(
            ArtifactFetcher::new(store),
            Arc::new(VenvProvisioner::new(config.provisioner.clone())),
            Arc::new(PythonPluginLoader::new(config.solver_timeout)),
            config.batching,
        )
    }

    /// Run the pipeline and return the raw solver output.
    pub async fn execute(
        &self,
        request: &SolveRequest,
        progress: &ProgressFn<'_>,
    ) -> Result<ExecutionOutput, CoreError> {
        let (source, manifest) = self.fetch_solver(&request.solver).await?;

        let env = self.provisioner.provision(manifest.as_deref()).await?;
        let plugin = self.loader.load(&env, &source).await?;

        let arguments = bind(plugin.signature(), &request.parameters)?;
        tracing::debug!(
            dataset_parameter = %arguments.dataset_parameter,
            bound = arguments.parameters.len(),
            ignored = ?arguments.ignored,
            "Bound solver parameters",
        );

        let matrix = load_matrix(&self.fetch_dataset(&request.dataset).await?)?;
        let dataset = self.batching.apply(matrix);
        tracing::info!(
            rows = dataset.matrix().rows(),
            cols = dataset.matrix().cols(),
            units = dataset.unit_count(),
            "Dataset loaded",
        );

        let output = execute(plugin.as_ref(), &dataset, &arguments, progress).await?;

        drop(plugin);
        if let Err(e) = env.close() {
            tracing::warn!(error = %e, "Environment teardown failed");
        }
        Ok(output)
    }

    /// Run the pipeline and return the normalized output unshaped.
    pub async fn solve(
        &self,
        request: &SolveRequest,
        progress: &ProgressFn<'_>,
    ) -> Result<Value, CoreError> {
        flatten_output(&self.execute(request, progress).await?)
    }

    /// Run a submitted job, publishing its progress on `bus`.
    ///
    /// Never fails: every error becomes the returned failure event. The
    /// terminal event itself is not published here; the caller records it
    /// and then publishes it, so a job is observable as finished before its
    /// subscribers are told.
    pub async fn run_job(&self, job: &Job, bus: &JobBus) -> FinalEvent {
        let job_id = job.id;
        let progress = move |event: ProgressEvent| {
            bus.publish_message(job_id, &event.into());
        };

        let request = SolveRequest::for_job(job);
        let span = tracing::info_span!("job", job_id = %job_id);
        let outcome = async {
            let output = self.execute(&request, &progress).await?;
            shape_output(&output)
        }
        .instrument(span)
        .await;

        match outcome {
            Ok(result) => {
                tracing::info!(job_id = %job_id, "Job succeeded");
                FinalEvent::Success {
                    description: job.description.clone(),
                    result,
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job failed");
                FinalEvent::Failure {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn fetch_solver(
        &self,
        solver: &Artifact,
    ) -> Result<(Vec<u8>, Option<String>), CoreError> {
        let location = match solver {
            Artifact::Inline(source) => return Ok((source.clone(), None)),
            Artifact::Reference(reference) => StorageLocation::parse(reference)?,
        };

        let source = self.fetcher.fetch(&location).await?;
        let manifest = match location.manifest() {
            Some(manifest) => match self.fetcher.fetch_optional(&manifest).await {
                Ok(bytes) => bytes,
                Err(StorageError::Empty(_)) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };
        tracing::debug!(
            solver = %location,
            manifest = manifest.is_some(),
            "Fetched solver",
        );

        Ok((
            source.to_vec(),
            manifest.map(|m| String::from_utf8_lossy(&m).into_owned()),
        ))
    }

    async fn fetch_dataset(&self, dataset: &Artifact) -> Result<Vec<u8>, CoreError> {
        match dataset {
            Artifact::Inline(bytes) => Ok(bytes.clone()),
            Artifact::Reference(reference) => {
                let location = StorageLocation::parse(reference)?;
                // Removed when `artifact` drops.
                let artifact = self.fetcher.fetch_to_temp(&location).await?;
                Ok(artifact.read().await?)
            }
        }
    }
}
