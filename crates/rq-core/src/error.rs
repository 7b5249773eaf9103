use crate::types::enums::JobStatus;
use rq_git::GitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not found")]
    NotFound,
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("conflict: {message}")]
    Conflict { message: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review not found")]
    ReviewNotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repo not found")]
    RepoNotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("job is not a fix job")]
    NotAFixJob,
    #[error("job has no patch")]
    NoPatch,
    #[error("patch is stale: built on {base}, ref is now at {current}")]
    StalePatch { base: String, current: String },
    #[error("patch failed to apply: {reason}")]
    ApplyFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown agent: {name}")]
    UnknownAgent { name: String },
    #[error("failed to start agent: {message}")]
    Spawn { message: String },
    #[error("agent failed: {message}")]
    Failed { message: String },
    #[error("agent timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("agent canceled")]
    Canceled,
}

#[derive(Debug, Error)]
pub enum RqError {
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RqError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RqError::Job(JobError::NotFound)
                | RqError::Review(ReviewError::ReviewNotFound)
                | RqError::Repo(RepoError::RepoNotFound)
        )
    }

    /// True for errors a racing writer sees after losing a guarded transition.
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            RqError::Job(
                JobError::NotFound | JobError::Conflict { .. } | JobError::InvalidTransition { .. }
            )
        )
    }
}
