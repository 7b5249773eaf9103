mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestDaemon, ctx};
use rq_core::types::JobStatus;
use rq_serve::with_queue;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn cancel_queued_job_then_again_is_not_found() {
    let daemon = TestDaemon::new();
    let job = daemon.enqueue_sha("abc123");

    let (status, body) = daemon
        .post("/api/job/cancel", json!({ "job_id": job.id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");

    let (status, body) = daemon
        .post("/api/job/cancel", json!({ "job_id": job.id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn cancel_of_an_orphaned_running_job_is_forced_after_the_grace_period() {
    let daemon = TestDaemon::with_settings(|settings| settings.cancel_grace_ms = 50);
    let job = daemon.enqueue_sha("abc123");
    with_queue(&daemon.state, |queue| queue.jobs().claim(&ctx(), "w")).unwrap();

    let (status, body) = daemon
        .post("/api/job/cancel", json!({ "job_id": job.id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "canceled");
    let job = daemon.job(job.id);
    assert_eq!(job.status, JobStatus::Canceled);
    assert!(job.cancel_requested_at.is_some());
}

#[tokio::test]
async fn cancel_rejects_unknown_missing_and_wrong_method() {
    let daemon = TestDaemon::new();

    let (status, _) = daemon.post("/api/job/cancel", json!({ "job_id": 999 })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = daemon.post("/api/job/cancel", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_input");

    let (status, _) = daemon.get("/api/job/cancel").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn cancel_finished_job_is_not_found() {
    let daemon = TestDaemon::new();
    let job = daemon.enqueue_sha("abc123");
    with_queue(&daemon.state, |queue| {
        queue.jobs().claim(&ctx(), "w")?;
        queue.jobs().complete(&ctx(), job.id, "test", "p", "## Verdict: PASS")
    })
    .unwrap();

    let (status, _) = daemon
        .post("/api/job/cancel", json!({ "job_id": job.id }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(daemon.job(job.id).status, JobStatus::Done);
}

#[tokio::test]
async fn enqueue_fills_defaults_and_validates() {
    let daemon = TestDaemon::new();

    let (status, body) = daemon
        .post(
            "/api/enqueue",
            json!({ "repo_path": "/tmp/rq-api-repo", "git_ref": "feature" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    assert_eq!(body["agent"], "test");
    assert_eq!(body["git_ref"], "feature");
    assert_eq!(body["source_machine_id"], "test-machine");

    let (status, _) = daemon
        .post("/api/enqueue", json!({ "repo_path": "/tmp/rq-api-repo", "git_ref": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = daemon
        .post(
            "/api/enqueue",
            json!({ "repo_path": "/tmp/rq-api-repo", "git_ref": "x", "parent_job_id": 4242 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_review_and_comments_round_out_a_completed_job() {
    let daemon = TestDaemon::new();
    let job = daemon.enqueue_sha("abc123");

    let (status, _) = daemon.get(&format!("/api/review?job_id={}", job.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    with_queue(&daemon.state, |queue| {
        queue.jobs().claim(&ctx(), "w")?;
        queue
            .jobs()
            .complete(&ctx(), job.id, "test", "p", "- Critical: leaks a file handle")
    })
    .unwrap();

    let (status, body) = daemon.get(&format!("/api/job?id={}", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "done");
    assert_eq!(body["job"]["verdict"], "F");
    assert_eq!(body["review"]["verdict_bool"], false);

    let (status, body) = daemon.get("/api/review?sha=abc123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["id"], job.id.get());

    let (status, body) = daemon
        .post(
            "/api/comment",
            json!({ "job_id": job.id, "responder": "alice", "text": "will fix" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["responder"], "alice");

    let (status, _) = daemon
        .post("/api/comment", json!({ "job_id": job.id, "responder": "", "text": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = daemon.get(&format!("/api/comments?job_id={}", job.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = daemon.get("/api/comments?job_id=777").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn jobs_lookup_by_ids_commit_and_status() {
    let daemon = TestDaemon::new();
    let first = daemon.enqueue_sha("aaa111");
    let second = daemon.enqueue_sha("bbb222");
    with_queue(&daemon.state, |queue| queue.jobs().cancel(&ctx(), second.id)).unwrap();

    let (status, body) = daemon
        .get(&format!("/api/jobs?ids={},{},999", first.id, second.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    let map = body.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map[&second.id.to_string()]["job"]["status"], "canceled");

    let (status, _) = daemon.get("/api/jobs?ids=1,nope").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = daemon.get("/api/jobs?status=queued").await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], first.id.get());

    let (status, _) = daemon.get("/api/jobs?status=sleeping").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wait_returns_once_the_job_finishes() {
    let daemon = TestDaemon::new();
    let job = daemon.enqueue_sha("abc123");
    with_queue(&daemon.state, |queue| queue.jobs().claim(&ctx(), "w")).unwrap();

    let state = daemon.state.clone();
    let id = job.id;
    let finisher = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        with_queue(&state, |queue| {
            queue.jobs().complete(&ctx(), id, "test", "p", "## Verdict: PASS")
        })
        .unwrap();
    });

    let (status, body) = daemon
        .get(&format!("/api/job/wait?job_id={}&timeout_secs=10", job.id))
        .await;
    finisher.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "done");
    assert_eq!(body["job"]["verdict"], "P");
}

#[tokio::test]
async fn wait_times_out_with_current_state() {
    let daemon = TestDaemon::new();
    let job = daemon.enqueue_sha("abc123");

    let (status, body) = daemon
        .post("/api/job/wait", json!({ "job_id": job.id, "timeout_secs": 0 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["status"], "queued");

    let (status, _) = daemon.get("/api/job/wait?job_id=4242").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_counts_and_workers() {
    let daemon = TestDaemon::with_settings(|settings| settings.max_workers = 3);
    daemon.enqueue_sha("aaa111");
    daemon.enqueue_sha("bbb222");

    let (status, body) = daemon.get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workers"], 3);
    assert_eq!(body["counts"]["queued"], 2);
    assert_eq!(body["counts"]["done"], 0);
}

#[tokio::test]
async fn correlation_id_is_echoed_or_generated() {
    let daemon = TestDaemon::new();

    let response = tower::ServiceExt::oneshot(
        daemon.router.clone(),
        Request::get("/api/status")
            .header("x-correlation-id", "corr_fixed")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.headers()["x-correlation-id"], "corr_fixed");

    let response = tower::ServiceExt::oneshot(
        daemon.router.clone(),
        Request::get("/api/status").body(Body::empty()).unwrap(),
    )
    .await
    .unwrap();
    let generated = response.headers()["x-correlation-id"].to_str().unwrap();
    assert!(generated.starts_with("corr_"));
}
