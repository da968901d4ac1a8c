//! In-memory job records.
//!
//! Jobs are created on submission, mutated only by the worker running them
//! and never deleted.

use std::collections::HashMap;

use parking_lot::RwLock;
use quboflow_core::error::CoreError;
use quboflow_core::job::Job;
use quboflow_core::messages::{FinalEvent, JobMessage};
use quboflow_core::types::JobId;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// Forget a job that was never dispatched.
    pub fn remove(&self, id: JobId) -> Option<Job> {
        self.jobs.write().remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Move a pending job to running and return a snapshot of it.
    pub fn start(&self, id: JobId) -> Result<Job, CoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        job.mark_running()?;
        Ok(job.clone())
    }

    /// Record a job's terminal event.
    pub fn finish(&self, id: JobId, event: &FinalEvent) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or_else(|| not_found(id))?;
        match event {
            FinalEvent::Success { result, .. } => job.succeed(result.clone()),
            FinalEvent::Failure { error } => job.fail(error.clone()),
        }
    }

    /// The terminal payload of a finished job, as it was published.
    pub fn terminal_payload(&self, id: JobId) -> Option<String> {
        let jobs = self.jobs.read();
        let job = jobs.get(&id)?;
        let event = match (&job.result, &job.error) {
            (Some(result), _) => FinalEvent::Success {
                description: job.description.clone(),
                result: result.clone(),
            },
            (None, Some(error)) => FinalEvent::Failure {
                error: error.clone(),
            },
            (None, None) => return None,
        };
        Some(JobMessage::Final(event).to_payload())
    }
}

fn not_found(id: JobId) -> CoreError {
    CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use quboflow_core::job::{JobStatus, JobSubmission};
    use quboflow_core::types::Parameters;
    use serde_json::json;

    use super::*;

    fn job() -> Job {
        Job::new(JobSubmission {
            dataset_reference: "b/d.json".into(),
            solver_reference: "b/s.py".into(),
            description: "demo".into(),
            parameters: Parameters::new(),
        })
    }

    #[test]
    fn lifecycle_is_recorded() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;
        registry.insert(job);

        assert_eq!(registry.start(id).unwrap().status, JobStatus::Running);
        assert!(registry.terminal_payload(id).is_none());

        let event = FinalEvent::Success {
            description: "demo".into(),
            result: json!({"best_cost": 0.0}),
        };
        registry.finish(id, &event).unwrap();

        assert_eq!(registry.get(id).unwrap().status, JobStatus::Succeeded);
        assert_eq!(
            registry.terminal_payload(id).unwrap(),
            JobMessage::Final(event).to_payload()
        );
    }

    #[test]
    fn failure_payload_is_stored() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;
        registry.insert(job);
        registry.start(id).unwrap();
        registry
            .finish(
                id,
                &FinalEvent::Failure {
                    error: "FetchError: gone".into(),
                },
            )
            .unwrap();
        assert_eq!(
            registry.terminal_payload(id).unwrap(),
            r#"{"error":"FetchError: gone"}"#
        );
    }

    #[test]
    fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        assert_matches!(
            registry.start(uuid::Uuid::new_v4()),
            Err(CoreError::NotFound { entity: "Job", .. })
        );
    }

    #[test]
    fn job_cannot_start_twice() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;
        registry.insert(job);
        registry.start(id).unwrap();
        assert_matches!(registry.start(id), Err(CoreError::Internal(_)));
    }
}
