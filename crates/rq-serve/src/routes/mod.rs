pub mod error;
pub mod jobs;
pub mod patches;
pub mod reviews;
pub mod status;

use crate::AppState;
use crate::middleware::correlation::correlation_middleware;
use axum::Router;
use axum::middleware;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(jobs::router(state.clone()))
        .merge(reviews::router(state.clone()))
        .merge(patches::router(state.clone()))
        .merge(status::router(state))
        .route_layer(middleware::from_fn(correlation_middleware));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}
