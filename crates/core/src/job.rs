//! Job records and their lifecycle.
//!
//! A job moves `pending → running → {succeeded | failed}` and never leaves a
//! terminal state. Only the worker executing a job mutates it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::error::CoreError;
use crate::types::{JobId, Parameters, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Body of a job submission.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct JobSubmission {
    #[validate(length(min = 1, message = "dataset_reference must not be empty"))]
    pub dataset_reference: String,
    #[validate(length(min = 1, message = "solver_reference must not be empty"))]
    pub solver_reference: String,
    #[serde(default)]
    #[validate(length(max = 2000, message = "description is limited to 2000 characters"))]
    pub description: String,
    #[serde(default)]
    pub parameters: Parameters,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub description: String,
    pub dataset_reference: String,
    pub solver_reference: String,
    pub parameters: Parameters,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Terminal failure message, set when the job fails.
    pub error: Option<String>,
    /// Normalized result, set when the job succeeds.
    pub result: Option<Value>,
}

impl Job {
    /// Create a pending job with a fresh identifier.
    pub fn new(submission: JobSubmission) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            status: JobStatus::Pending,
            description: submission.description,
            dataset_reference: submission.dataset_reference,
            solver_reference: submission.solver_reference,
            parameters: submission.parameters,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            result: None,
        }
    }

    pub fn mark_running(&mut self) -> Result<(), CoreError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, result: Value) -> Result<(), CoreError> {
        self.transition(JobStatus::Succeeded)?;
        self.finished_at = Some(chrono::Utc::now());
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(chrono::Utc::now());
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::Internal(format!(
                "job {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn submission() -> JobSubmission {
        JobSubmission {
            dataset_reference: "datasets/qubo.npy".into(),
            solver_reference: "solvers/anneal.py".into(),
            description: "test run".into(),
            parameters: Parameters::new(),
        }
    }

    #[test]
    fn new_job_is_pending() {
        let job = Job::new(submission());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = Job::new(submission());
        job.mark_running().unwrap();
        job.succeed(serde_json::json!({"best_cost": 0.0})).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.finished_at.is_some());
        assert_eq!(job.result.as_ref().unwrap()["best_cost"], 0.0);
    }

    #[test]
    fn terminal_state_is_final() {
        let mut job = Job::new(submission());
        job.mark_running().unwrap();
        job.fail("boom").unwrap();
        assert_matches!(job.succeed(Value::Null), Err(CoreError::Internal(_)));
        assert_matches!(job.fail("again"), Err(CoreError::Internal(_)));
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut job = Job::new(submission());
        assert!(job.succeed(Value::Null).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn empty_references_fail_validation() {
        let mut sub = submission();
        sub.solver_reference.clear();
        let err: CoreError = sub.validate().unwrap_err().into();
        assert_matches!(err, CoreError::Validation(msg) if msg.contains("solver_reference"));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(JobStatus::Succeeded).unwrap();
        assert_eq!(json, "succeeded");
    }
}
