pub mod middleware;
pub mod routes;
pub mod worker;

use rq_core::agent::AgentRegistry;
use rq_core::{Queue, RqError, Settings};
use rq_db::DbStore;
use rq_db::schema;
use rq_events::EventBus;
use rq_git::GitBackend;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use crate::worker::WorkerPool;

#[derive(Clone)]
pub struct AppState {
    pub db_path: PathBuf,
    pub event_bus: EventBus,
    pub settings: Arc<Settings>,
    pub git: Arc<dyn GitBackend>,
    pub workers: usize,
}

impl AppState {
    /// Creates the state and brings the database schema up to date.
    pub fn new(settings: Settings, git: Arc<dyn GitBackend>) -> Result<Self, RqError> {
        schema::open_and_migrate(&settings.db_path).map_err(|err| RqError::Storage {
            message: err.to_string(),
        })?;
        Ok(Self {
            db_path: settings.db_path.clone(),
            event_bus: EventBus::new(1024),
            workers: settings.max_workers,
            settings: Arc::new(settings),
            git,
        })
    }
}

/// Opens a fresh connection; queues are short-lived and never shared across tasks.
pub fn build_queue(state: &AppState) -> Result<Queue<DbStore>, RqError> {
    let conn = schema::open(&state.db_path).map_err(|err| RqError::Storage {
        message: err.to_string(),
    })?;
    let store = DbStore::new(conn).with_verdict_parser(state.settings.verdict_parser());
    Ok(Queue::new(store, state.event_bus.clone()))
}

pub fn with_queue<T, F>(state: &AppState, f: F) -> Result<T, RqError>
where
    F: FnOnce(&Queue<DbStore>) -> Result<T, RqError>,
{
    let queue = build_queue(state)?;
    f(&queue)
}

/// Runs `f` on the blocking pool so git subprocesses never stall the runtime threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, RqError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RqError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| RqError::Internal {
            message: format!("blocking task failed: {err}"),
        })?
}

pub fn app(state: AppState) -> axum::Router {
    routes::router(state)
}

/// Serves the HTTP API and runs the worker pool until `shutdown` fires.
pub async fn run_daemon(
    state: AppState,
    registry: AgentRegistry,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    match with_queue(&state, |queue| queue.reviews().backfill_verdicts()) {
        Ok(0) => {}
        Ok(count) => tracing::info!(count, "backfilled legacy verdicts"),
        Err(err) => tracing::warn!(error = %err, "verdict backfill failed"),
    }

    let pool = WorkerPool::new(state.clone(), Arc::new(registry), shutdown.clone());
    let workers = pool.spawn(state.workers);
    tracing::info!(
        addr = %listener.local_addr()?,
        workers = state.workers,
        "daemon listening"
    );

    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await;
    shutdown.cancel();
    workers.join_all().await;
    served
}
