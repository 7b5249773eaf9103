use crate::middleware::correlation::CorrelationId;
use crate::routes::error::{bad_request, map_error};
use crate::routes::jobs::JobIdRequest;
use crate::{AppState, blocking, with_queue};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, Router};
use rq_core::RequestContext;
use rq_events::EventSource;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/job/apply", post(apply))
        .route("/job/rerun", post(rerun))
        .with_state(state)
}

pub(crate) async fn apply(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<JobIdRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(JobIdRequest { job_id: Some(id) })) = payload else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    let corr = Some(correlation.0);
    let ctx = RequestContext::new(EventSource::Api, corr.clone());
    let result = blocking(move || {
        with_queue(&state, |queue| queue.patches(state.git.as_ref()).apply(&ctx, id))
    })
    .await;
    match result {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err, corr).into_response(),
    }
}

pub(crate) async fn rerun(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<JobIdRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(JobIdRequest { job_id: Some(id) })) = payload else {
        return bad_request("job_id is required", Some(correlation.0)).into_response();
    };
    let corr = Some(correlation.0);
    let ctx = RequestContext::new(EventSource::Api, corr.clone());
    let result = blocking(move || {
        with_queue(&state, |queue| queue.patches(state.git.as_ref()).rerun(&ctx, id))
    })
    .await;
    match result {
        Ok(job) => Json(job).into_response(),
        Err(err) => map_error(&err, corr).into_response(),
    }
}
