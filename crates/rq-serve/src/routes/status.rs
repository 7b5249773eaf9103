use crate::middleware::correlation::CorrelationId;
use crate::routes::error::map_error;
use crate::{AppState, with_queue};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, Router};
use rq_core::types::job::QueueStatus;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .with_state(state)
}

pub(crate) async fn status(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
) -> Response {
    match with_queue(&state, |queue| queue.jobs().status()) {
        Ok(counts) => Json(QueueStatus {
            workers: state.workers,
            ..counts
        })
        .into_response(),
        Err(err) => map_error(&err, Some(correlation.0)).into_response(),
    }
}
