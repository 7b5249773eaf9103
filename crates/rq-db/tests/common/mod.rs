#![allow(dead_code)]

use chrono::Utc;
use rq_core::types::{CommitMeta, EnqueueInput, JobId, ReviewJob};
use rq_core::{Queue, RequestContext};
use rq_db::DbStore;
use rq_db::schema::{open_and_migrate, with_test_db};
use rq_events::{EventBus, EventSource};
use std::path::Path;

pub fn test_queue() -> Queue<DbStore> {
    Queue::new(DbStore::new(with_test_db().unwrap()), EventBus::new(64))
}

pub fn file_queue(path: &Path, bus: &EventBus) -> Queue<DbStore> {
    Queue::new(DbStore::new(open_and_migrate(path).unwrap()), bus.clone())
}

pub fn ctx() -> RequestContext {
    RequestContext::new(EventSource::Api, None)
}

pub fn enqueue_input(repo: &str, sha: &str) -> EnqueueInput {
    EnqueueInput {
        repo_path: repo.into(),
        git_ref: sha.to_string(),
        commit: Some(CommitMeta {
            sha: sha.to_string(),
            author: "Test User".to_string(),
            subject: format!("commit {sha}"),
            timestamp: Utc::now(),
        }),
        agent: "test".to_string(),
        ..EnqueueInput::default()
    }
}

pub fn enqueue(queue: &Queue<DbStore>, repo: &str, sha: &str) -> ReviewJob {
    queue.jobs().enqueue(&ctx(), enqueue_input(repo, sha)).unwrap()
}

/// Enqueues, claims and completes a job with `output`.
pub fn completed_job(queue: &Queue<DbStore>, repo: &str, sha: &str, output: &str) -> ReviewJob {
    let job = enqueue(queue, repo, sha);
    let claimed = queue.jobs().claim(&ctx(), "test-worker").unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    queue
        .jobs()
        .complete(&ctx(), job.id, "test", "prompt", output)
        .unwrap()
}

pub fn ids(jobs: &[&ReviewJob]) -> Vec<JobId> {
    jobs.iter().map(|job| job.id).collect()
}
