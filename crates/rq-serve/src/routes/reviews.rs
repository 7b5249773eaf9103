use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{bad_request, map_error};
use crate::{AppState, with_queue};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use rq_core::RequestContext;
use rq_core::types::ids::JobId;
use rq_events::EventSource;
use serde::Deserialize;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/comment", post(add_comment))
        .route("/comments", get(list_comments))
        .route("/review", get(get_review))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub responder: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub job_id: Option<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewQuery {
    pub job_id: Option<JobId>,
    pub sha: Option<String>,
}

pub(crate) async fn add_comment(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<CommentRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text(), Some(correlation.0)).into_response(),
    };
    let Some(job_id) = request.job_id else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    let ctx = RequestContext::new(EventSource::Api, Some(correlation.0));
    let added = with_queue(&state, |queue| {
        queue
            .reviews()
            .add_comment(&ctx, job_id, &request.responder, &request.text)
    });
    match added {
        Ok(response) => Json(response).into_response(),
        Err(err) => map_error(&err, ctx.correlation_id).into_response(),
    }
}

pub(crate) async fn list_comments(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<JobQuery>,
) -> Response {
    let Some(job_id) = query.job_id else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    match with_queue(&state, |queue| queue.reviews().comments(job_id)) {
        Ok(comments) => Json(comments).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}

pub(crate) async fn get_review(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ReviewQuery>,
) -> Response {
    let found = match (query.job_id, query.sha.as_deref()) {
        (Some(job_id), _) => with_queue(&state, |queue| queue.reviews().by_job(job_id)),
        (None, Some(sha)) => with_queue(&state, |queue| queue.reviews().by_commit_sha(sha)),
        (None, None) => {
            return bad_request("job_id or sha is required", Some(correlation.0)).into_response();
        }
    };
    match found {
        Ok(review) => Json(review).into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}
