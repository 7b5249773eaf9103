use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{bad_request, map_error};
use crate::{AppState, blocking, with_queue};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use rq_core::types::enums::JobStatus;
use rq_core::types::ids::JobId;
use rq_core::types::io::{CommitMeta, EnqueueInput, EnqueueRequest, JobFilter};
use rq_core::types::job::JobWithReview;
use rq_core::error::JobError;
use rq_core::types::job::ReviewJob;
use rq_core::{RequestContext, RqError};
use rq_events::{EventSource, JobEvent};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const DEFAULT_WAIT: Duration = Duration::from_secs(30);
const MAX_WAIT: Duration = Duration::from_secs(300);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/job", get(get_job))
        .route("/job/cancel", post(cancel))
        .route("/job/wait", get(wait_query).post(wait_body))
        .route("/jobs", get(list_jobs))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct JobIdRequest {
    pub job_id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct GetJobQuery {
    pub id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct WaitRequest {
    pub job_id: Option<JobId>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JobsQuery {
    pub ids: Option<String>,
    pub repo: Option<PathBuf>,
    pub sha: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u32>,
}

pub(crate) async fn enqueue(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => return bad_request(rejection.body_text(), Some(correlation.0)).into_response(),
    };
    let corr = Some(correlation.0);
    let ctx = RequestContext::new(EventSource::Api, corr.clone());
    let result = blocking(move || {
        let input = enqueue_input(&state, request);
        with_queue(&state, |queue| queue.jobs().enqueue(&ctx, input))
    })
    .await;
    match result {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err, corr).into_response(),
    }
}

/// Fills in defaults from settings and, when the caller did not send commit
/// metadata, reads it from the repository.
fn enqueue_input(state: &AppState, request: EnqueueRequest) -> EnqueueInput {
    let sha = request.commit_sha.filter(|sha| !sha.trim().is_empty()).or_else(|| {
        state
            .git
            .resolve_sha(&request.repo_path, &request.git_ref)
            .ok()
    });
    let commit = sha.map(|sha| match (request.commit_author, request.commit_subject) {
        (Some(author), Some(subject)) => CommitMeta {
            sha,
            author,
            subject,
            timestamp: Utc::now(),
        },
        (author, subject) => match state.git.commit_info(&request.repo_path, &sha) {
            Ok(info) => CommitMeta {
                sha: info.sha,
                author: info.author,
                subject: info.subject,
                timestamp: info.timestamp,
            },
            Err(_) => CommitMeta {
                sha,
                author: author.unwrap_or_default(),
                subject: subject.unwrap_or_default(),
                timestamp: Utc::now(),
            },
        },
    });

    EnqueueInput {
        repo_path: request.repo_path,
        git_ref: request.git_ref,
        commit,
        agent: request
            .agent
            .unwrap_or_else(|| state.settings.default_agent.clone()),
        model: request.model,
        reasoning: request.reasoning,
        options: request.options,
        parent_job_id: request.parent_job_id,
        source_machine_id: request
            .source_machine_id
            .or_else(|| Some(state.settings.machine_id.clone())),
    }
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<GetJobQuery>,
) -> Response {
    let Some(id) = query.id else {
        return bad_request("id is required", Some(correlation.0)).into_response();
    };
    match with_queue(&state, |queue| queue.jobs().get_with_review(id)) {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

/// Cancels a job. A running job is stopped by its worker, which removes any
/// worktree before writing `canceled`; the row is marked here only when no
/// worker has done so within the grace period.
pub(crate) async fn cancel(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<JobIdRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(JobIdRequest { job_id: Some(id) })) = payload else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    let corr = Some(correlation.0);
    let ctx = RequestContext::new(EventSource::Api, corr.clone());
    // Subscribe before requesting so the worker's transition cannot be missed.
    let mut events = state.event_bus.subscribe();
    let job = match with_queue(&state, |queue| queue.jobs().request_cancel(&ctx, id)) {
        Ok(job) => job,
        Err(err) => return map_error(&err, corr).into_response(),
    };
    if job.status != JobStatus::Running {
        tracing::info!(job_id = %id, "job canceled");
        return Json(job).into_response();
    }

    let deadline = Instant::now() + state.settings.cancel_grace();
    let tick = state.settings.poll_interval();
    while Instant::now() < deadline {
        tokio::select! {
            () = next_event_for(&mut events, id) => {}
            () = tokio::time::sleep(tick) => {}
            () = tokio::time::sleep_until(deadline) => {}
        }
        match with_queue(&state, |queue| queue.jobs().get(id)) {
            Ok(job) if job.status == JobStatus::Running => {}
            Ok(job) => return settled(job, corr),
            Err(err) => return map_error(&err, corr).into_response(),
        }
    }

    tracing::warn!(job_id = %id, "no worker stopped the job in time; marking it canceled");
    let forced = with_queue(&state, |queue| match queue.jobs().cancel(&ctx, id) {
        Err(err) if err.is_not_found() => queue.jobs().get(id),
        other => other,
    });
    match forced {
        Ok(job) => settled(job, corr),
        Err(err) => map_error(&err, corr).into_response(),
    }
}

/// A cancel that lost to completion reports the job as no longer cancelable.
fn settled(job: ReviewJob, corr: Option<String>) -> Response {
    if job.status == JobStatus::Canceled {
        tracing::info!(job_id = %job.id, "job canceled");
        Json(job).into_response()
    } else {
        map_error(&RqError::Job(JobError::NotFound), corr).into_response()
    }
}

pub(crate) async fn wait_query(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(request): Query<WaitRequest>,
) -> Response {
    wait_for(state, correlation, request).await
}

pub(crate) async fn wait_body(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<WaitRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(request)) => wait_for(state, correlation, request).await,
        Err(rejection) => bad_request(rejection.body_text(), Some(correlation.0)).into_response(),
    }
}

/// Long-polls until the job is terminal or the timeout passes, then returns
/// the row as it stands.
async fn wait_for(state: AppState, correlation: CorrelationId, request: WaitRequest) -> Response {
    let Some(id) = request.job_id else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    let timeout = request
        .timeout_secs
        .map_or(DEFAULT_WAIT, Duration::from_secs)
        .min(MAX_WAIT);
    let deadline = Instant::now() + timeout;
    // Subscribe before the first read so no transition slips between them.
    let mut events = state.event_bus.subscribe();

    loop {
        let job = match with_queue(&state, |queue| queue.jobs().get_with_review(id)) {
            Ok(job) => job,
            Err(err) => return map_error(&err, Some(correlation.0)).into_response(),
        };
        if job.job.status.is_terminal() || Instant::now() >= deadline {
            return Json::<JobWithReview>(job).into_response();
        }
        let tick = state.settings.poll_interval();
        tokio::select! {
            () = next_event_for(&mut events, id) => {}
            () = tokio::time::sleep(tick) => {}
            () = tokio::time::sleep_until(deadline) => {}
        }
    }
}

async fn next_event_for(events: &mut broadcast::Receiver<JobEvent>, id: JobId) {
    loop {
        match events.recv().await {
            Ok(event) if event.job_id == id.get() => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let corr = Some(correlation.0);
    if let Some(raw) = query.ids.as_deref() {
        let ids = match parse_ids(raw) {
            Ok(ids) => ids,
            Err(message) => return bad_request(message, corr).into_response(),
        };
        return match with_queue(&state, |queue| queue.jobs().get_many_with_reviews(&ids)) {
            Ok(jobs) => Json(jobs).into_response(),
            Err(err) => map_error(&err, corr).into_response(),
        };
    }

    match (query.repo.as_deref(), query.sha.as_deref()) {
        (Some(repo), Some(sha)) => {
            let found = with_queue(&state, |queue| queue.jobs().latest_for_commit(repo, sha));
            return match found {
                Ok(job) => Json(job.into_iter().collect::<Vec<_>>()).into_response(),
                Err(err) => map_error(&err, corr).into_response(),
            };
        }
        (None, Some(_)) => {
            return bad_request("sha requires repo", corr).into_response();
        }
        _ => {}
    }

    let status = match query.status.as_deref().map(str::parse::<JobStatus>).transpose() {
        Ok(status) => status,
        Err(message) => return bad_request(message, corr).into_response(),
    };
    let filter = JobFilter {
        status,
        repo_path: query.repo,
        limit: query.limit,
    };
    match with_queue(&state, |queue| queue.jobs().list(&filter)) {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => map_error(&err, corr).into_response(),
    }
}

fn parse_ids(raw: &str) -> Result<Vec<JobId>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<JobId>().map_err(|err| err.to_string()))
        .collect()
}
