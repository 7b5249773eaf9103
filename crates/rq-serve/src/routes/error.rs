use axum::Json;
use axum::http::StatusCode;
use rq_core::error::{AgentError, JobError, PatchError, RepoError, ReviewError, RqError};
use rq_git::GitError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: &'static str,
    pub message: String,
    pub correlation_id: Option<String>,
}

pub fn map_error(err: &RqError, correlation_id: Option<String>) -> (StatusCode, Json<ErrorEnvelope>) {
    let (status, code, message) = match err {
        RqError::Job(job) => map_job_error(job),
        RqError::Review(review) => map_review_error(review),
        RqError::Repo(repo) => map_repo_error(repo),
        RqError::Patch(patch) => map_patch_error(patch),
        RqError::Git(git) => map_git_error(git),
        RqError::Agent(agent) => map_agent_error(agent),
        RqError::Storage { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            err.to_string(),
        ),
        RqError::Internal { message } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            message.clone(),
        ),
    };

    (
        status,
        Json(ErrorEnvelope {
            code,
            message,
            correlation_id,
        }),
    )
}

/// Envelope for requests rejected before they reach the queue.
pub fn bad_request(
    message: impl Into<String>,
    correlation_id: Option<String>,
) -> (StatusCode, Json<ErrorEnvelope>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorEnvelope {
            code: "invalid_input",
            message: message.into(),
            correlation_id,
        }),
    )
}

fn map_job_error(err: &JobError) -> (StatusCode, &'static str, String) {
    match err {
        JobError::NotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        JobError::InvalidTransition { .. } => {
            (StatusCode::CONFLICT, "invalid_state", err.to_string())
        }
        JobError::Conflict { .. } => (StatusCode::CONFLICT, "conflict", err.to_string()),
        JobError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        JobError::Storage { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            err.to_string(),
        ),
    }
}

fn map_review_error(err: &ReviewError) -> (StatusCode, &'static str, String) {
    match err {
        ReviewError::ReviewNotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        ReviewError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        ReviewError::Storage { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            err.to_string(),
        ),
    }
}

fn map_repo_error(err: &RepoError) -> (StatusCode, &'static str, String) {
    match err {
        RepoError::RepoNotFound => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        RepoError::InvalidInput { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        RepoError::Storage { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            err.to_string(),
        ),
    }
}

fn map_patch_error(err: &PatchError) -> (StatusCode, &'static str, String) {
    match err {
        PatchError::NotAFixJob | PatchError::NoPatch => {
            (StatusCode::CONFLICT, "invalid_state", err.to_string())
        }
        PatchError::StalePatch { .. } => (StatusCode::CONFLICT, "stale_patch", err.to_string()),
        PatchError::ApplyFailed { .. } => {
            (StatusCode::CONFLICT, "apply_failed", err.to_string())
        }
    }
}

fn map_git_error(err: &GitError) -> (StatusCode, &'static str, String) {
    match err {
        GitError::RepoNotFound { .. } | GitError::RefNotFound { .. } => {
            (StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        GitError::PatchDoesNotApply { .. } | GitError::NothingToCommit => {
            (StatusCode::CONFLICT, "conflict", err.to_string())
        }
        GitError::CommandFailed { .. } | GitError::BackendError { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "git_error",
            err.to_string(),
        ),
    }
}

fn map_agent_error(err: &AgentError) -> (StatusCode, &'static str, String) {
    match err {
        AgentError::UnknownAgent { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_input", err.to_string())
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "agent_error",
            err.to_string(),
        ),
    }
}
