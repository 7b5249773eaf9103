use crate::error::JobError;
use crate::types::JobStatus;

pub fn validate_job_status_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    use JobStatus::{Applied, Canceled, Done, Failed, Queued, Rebased, Running};

    let valid = matches!(
        (from, to),
        (Queued, Running | Canceled)
            | (Running, Done | Failed | Canceled)
            | (Done, Applied | Rebased)
    );

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidTransition { from, to })
    }
}

/// Statuses a job may be in for a transition to `to` to succeed.
pub fn allowed_sources(to: JobStatus) -> Vec<JobStatus> {
    JobStatus::ALL
        .into_iter()
        .filter(|from| validate_job_status_transition(*from, to).is_ok())
        .collect()
}

pub fn require_non_empty(field: &str, value: &str) -> Result<(), JobError> {
    if value.trim().is_empty() {
        return Err(JobError::InvalidInput {
            message: format!("{field} is required"),
        });
    }
    Ok(())
}
