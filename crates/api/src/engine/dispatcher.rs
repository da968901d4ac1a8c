//! Job dispatcher and worker pool.
//!
//! Submissions go into a bounded queue drained by a fixed number of worker
//! tasks, each running one job at a time. Every job runs in its own spawned
//! task so that a panic is contained: the worker turns it into an
//! "execution lost" failure. Each job ends with exactly one terminal event,
//! recorded in the [`JobRegistry`] first and then published on the bus.
//! Jobs still queued at shutdown end with the same "execution lost" failure.

use std::sync::Arc;

use quboflow_core::error::CoreError;
use quboflow_core::job::Job;
use quboflow_core::messages::FinalEvent;
use quboflow_core::types::JobId;
use quboflow_events::JobBus;
use quboflow_worker::JobRunner;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::registry::JobRegistry;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("job queue is full, retry later")]
    QueueFull,
    #[error("job dispatcher is shutting down")]
    Stopped,
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherOptions {
    pub concurrency: usize,
    pub queue_capacity: usize,
}

/// Handle used to submit jobs. Cheap to clone.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: mpsc::Sender<JobId>,
    registry: Arc<JobRegistry>,
}

/// The spawned worker tasks.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Wait for every worker to stop. Workers stop once the cancellation
    /// token fires and their current job is done.
    pub async fn join(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

struct WorkerContext {
    runner: Arc<JobRunner>,
    registry: Arc<JobRegistry>,
    bus: Arc<JobBus>,
}

impl JobDispatcher {
    /// Spawn the worker pool and return the submission handle.
    pub fn start(
        runner: Arc<JobRunner>,
        registry: Arc<JobRegistry>,
        bus: Arc<JobBus>,
        options: DispatcherOptions,
        cancel: CancellationToken,
    ) -> (Self, WorkerPool) {
        let (queue, receiver) = mpsc::channel(options.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let context = Arc::new(WorkerContext {
            runner,
            registry: Arc::clone(&registry),
            bus,
        });

        let workers = (0..options.concurrency.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&context),
                    Arc::clone(&receiver),
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(
            concurrency = options.concurrency.max(1),
            queue_capacity = options.queue_capacity.max(1),
            "Job dispatcher started",
        );
        (Self { queue, registry }, WorkerPool { workers })
    }

    /// Register a job and queue it. Returns immediately.
    pub fn submit(&self, job: Job) -> Result<JobId, DispatchError> {
        let id = job.id;
        self.registry.insert(job);
        match self.queue.try_send(id) {
            Ok(()) => {
                tracing::info!(job_id = %id, "Job queued");
                Ok(id)
            }
            Err(e) => {
                self.registry.remove(id);
                Err(match e {
                    mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => DispatchError::Stopped,
                })
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    context: Arc<WorkerContext>,
    receiver: Arc<Mutex<mpsc::Receiver<JobId>>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            id = async { receiver.lock().await.recv().await } => id,
        };
        let Some(job_id) = next else {
            tracing::debug!(worker, "Worker stopping");
            break;
        };
        tracing::debug!(worker, job_id = %job_id, "Worker picked up job");
        process(&context, job_id).await;
    }
    drain_queue(&context, &receiver).await;
}

/// Close the queue and fail every job left in it.
async fn drain_queue(context: &WorkerContext, receiver: &Mutex<mpsc::Receiver<JobId>>) {
    let mut queue = receiver.lock().await;
    queue.close();
    while let Ok(job_id) = queue.try_recv() {
        tracing::warn!(job_id = %job_id, "Job still queued at shutdown");
        if let Err(e) = context.registry.start(job_id) {
            tracing::error!(job_id = %job_id, error = %e, "Cannot start job");
            continue;
        }
        conclude(context, job_id, execution_lost());
    }
}

async fn process(context: &WorkerContext, job_id: JobId) {
    let job = match context.registry.start(job_id) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Cannot start job");
            return;
        }
    };

    let runner = Arc::clone(&context.runner);
    let bus = Arc::clone(&context.bus);
    let handle = tokio::spawn(async move { runner.run_job(&job, &bus).await });

    let event = match handle.await {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Job task terminated abnormally");
            execution_lost()
        }
    };
    conclude(context, job_id, event);
}

/// Record the terminal event, then publish it.
fn conclude(context: &WorkerContext, job_id: JobId, event: FinalEvent) {
    if let Err(e) = context.registry.finish(job_id, &event) {
        tracing::error!(job_id = %job_id, error = %e, "Cannot record job outcome");
    }
    let delivered = context.bus.publish_message(job_id, &event.into());
    tracing::debug!(job_id = %job_id, delivered, "Published terminal event");
}

fn execution_lost() -> FinalEvent {
    FinalEvent::Failure {
        error: CoreError::Execution("execution lost: the worker terminated without a result".into())
            .to_string(),
    }
}
