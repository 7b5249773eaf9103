#![allow(dead_code)]

use axum::Router;
use chrono::Utc;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rq_core::Settings;
use rq_core::agent::{AgentRegistry, TestAgent};
use rq_core::types::{CommitMeta, EnqueueInput, JobId, ReviewJob};
use rq_core::RequestContext;
use rq_events::EventSource;
use rq_git::GitCli;
use rq_serve::{AppState, WorkerPool, app, with_queue};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

pub struct TestDaemon {
    pub state: AppState,
    pub router: Router,
    _dir: TempDir,
}

impl TestDaemon {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            db_path: dir.path().join("reviews.db"),
            poll_interval_ms: 20,
            machine_id: "test-machine".to_string(),
            ..Settings::default()
        };
        configure(&mut settings);
        let state = AppState::new(settings, Arc::new(GitCli::new())).unwrap();
        Self {
            router: app(state.clone()),
            state,
            _dir: dir,
        }
    }

    pub fn enqueue(&self, input: EnqueueInput) -> ReviewJob {
        with_queue(&self.state, |queue| queue.jobs().enqueue(&ctx(), input)).unwrap()
    }

    pub fn enqueue_sha(&self, sha: &str) -> ReviewJob {
        self.enqueue(EnqueueInput {
            repo_path: "/tmp/rq-test-repo".into(),
            git_ref: sha.to_string(),
            commit: Some(CommitMeta {
                sha: sha.to_string(),
                author: "Test User".to_string(),
                subject: format!("commit {sha}"),
                timestamp: Utc::now(),
            }),
            agent: "test".to_string(),
            ..EnqueueInput::default()
        })
    }

    pub fn job(&self, id: JobId) -> ReviewJob {
        with_queue(&self.state, |queue| queue.jobs().get(id)).unwrap()
    }

    pub fn start_workers(&self, agent: TestAgent, count: usize) -> (CancellationToken, JoinSet<()>) {
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(agent));
        let shutdown = CancellationToken::new();
        let pool = WorkerPool::new(self.state.clone(), Arc::new(agents), shutdown.clone());
        (shutdown, pool.spawn(count))
    }

    /// Polls until `check` holds for the job or five seconds pass.
    pub async fn wait_until(
        &self,
        id: JobId,
        check: impl Fn(&ReviewJob) -> bool,
    ) -> ReviewJob {
        for _ in 0..250 {
            let job = self.job(id);
            if check(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {id} never reached the expected state: {:?}", self.job(id));
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }
}

pub fn ctx() -> RequestContext {
    RequestContext::new(EventSource::Api, None)
}
