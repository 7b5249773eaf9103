mod common;

use common::{completed_job, ctx, enqueue, enqueue_input, ids, test_queue};
use rq_core::RqError;
use rq_core::error::{JobError, ReviewError};
use rq_core::types::{EnqueueInput, JobFilter, JobId, JobStatus, Verdict};
use std::path::Path;

#[test]
fn enqueue_creates_queued_job_with_commit_metadata() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/widgets", "abc123");

    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.repo_name, "widgets");
    assert_eq!(job.commit_sha.as_deref(), Some("abc123"));
    assert_eq!(job.commit_subject.as_deref(), Some("commit abc123"));
    assert!(job.started_at.is_none());
    assert!(job.finished_at.is_none());
    assert!(job.verdict.is_none());
}

#[test]
fn enqueue_does_not_deduplicate() {
    let queue = test_queue();
    let first = enqueue(&queue, "/tmp/widgets", "abc123");
    let second = enqueue(&queue, "/tmp/widgets", "abc123");
    assert!(second.id > first.id);
    assert_eq!(first.repo_id, second.repo_id);
    assert_eq!(first.commit_id, second.commit_id);
}

#[test]
fn enqueue_validates_input() {
    let queue = test_queue();
    let missing_agent = EnqueueInput {
        agent: " ".to_string(),
        ..enqueue_input("/tmp/widgets", "abc123")
    };
    assert!(matches!(
        queue.jobs().enqueue(&ctx(), missing_agent),
        Err(RqError::Job(JobError::InvalidInput { .. }))
    ));

    let unknown_parent = EnqueueInput {
        parent_job_id: Some(JobId::new(99)),
        ..enqueue_input("/tmp/widgets", "abc123")
    };
    assert!(matches!(
        queue.jobs().enqueue(&ctx(), unknown_parent),
        Err(RqError::Job(JobError::NotFound))
    ));
    assert!(queue.jobs().list(&JobFilter::default()).unwrap().is_empty());
}

#[test]
fn claim_is_fifo_and_stamps_owner() {
    let queue = test_queue();
    let first = enqueue(&queue, "/tmp/a", "111");
    let second = enqueue(&queue, "/tmp/b", "222");

    let claimed = queue.jobs().claim(&ctx(), "w1").unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
    assert!(claimed.started_at.is_some());

    let next = queue.jobs().claim(&ctx(), "w2").unwrap().unwrap();
    assert_eq!(next.id, second.id);
    assert!(queue.jobs().claim(&ctx(), "w3").unwrap().is_none());
}

#[test]
fn claim_never_returns_canceled_job() {
    let queue = test_queue();
    let canceled = enqueue(&queue, "/tmp/a", "111");
    let live = enqueue(&queue, "/tmp/a", "222");
    queue.jobs().cancel(&ctx(), canceled.id).unwrap();

    let claimed = queue.jobs().claim(&ctx(), "w1").unwrap().unwrap();
    assert_eq!(claimed.id, live.id);
    assert!(queue.jobs().claim(&ctx(), "w1").unwrap().is_none());
}

#[test]
fn complete_requires_running() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    let err = queue
        .jobs()
        .complete(&ctx(), job.id, "test", "prompt", "ok")
        .unwrap_err();
    assert!(matches!(
        err,
        RqError::Job(JobError::InvalidTransition {
            from: JobStatus::Queued,
            to: JobStatus::Done
        })
    ));
    assert!(queue.reviews().by_job(job.id).is_err());
}

#[test]
fn complete_stores_review_and_finishes_job() {
    let queue = test_queue();
    let job = completed_job(&queue, "/tmp/a", "111", "No issues found.\n\n## Verdict: PASS");

    assert_eq!(job.status, JobStatus::Done);
    assert!(job.finished_at.is_some());
    assert_eq!(job.verdict, Some(Verdict::Pass));

    let detail = queue.reviews().by_job(job.id).unwrap();
    assert_eq!(detail.review.verdict_bool, Some(true));
    assert_eq!(detail.review.agent, "test");
    assert_eq!(detail.job.id, job.id);
}

#[test]
fn fail_records_error_and_is_terminal() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().claim(&ctx(), "w1").unwrap();
    let failed = queue.jobs().fail(&ctx(), job.id, "agent crashed").unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("agent crashed"));
    assert!(failed.finished_at.is_some());

    assert!(matches!(
        queue.jobs().cancel(&ctx(), job.id),
        Err(RqError::Job(JobError::NotFound))
    ));
}

#[test]
fn cancel_queued_leaves_started_at_unset() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    let canceled = queue.jobs().cancel(&ctx(), job.id).unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(canceled.started_at.is_none());
    assert!(canceled.finished_at.is_some());
}

#[test]
fn cancel_twice_or_unknown_is_not_found() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().cancel(&ctx(), job.id).unwrap();
    assert!(matches!(
        queue.jobs().cancel(&ctx(), job.id),
        Err(RqError::Job(JobError::NotFound))
    ));
    assert!(matches!(
        queue.jobs().cancel(&ctx(), JobId::new(404)),
        Err(RqError::Job(JobError::NotFound))
    ));
}

#[test]
fn completing_a_canceled_job_loses() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().claim(&ctx(), "w1").unwrap();
    queue.jobs().cancel(&ctx(), job.id).unwrap();

    let err = queue
        .jobs()
        .complete(&ctx(), job.id, "test", "prompt", "late output")
        .unwrap_err();
    assert!(err.is_lost_race());
    assert_eq!(queue.jobs().get(job.id).unwrap().status, JobStatus::Canceled);
    assert!(queue.reviews().by_job(job.id).is_err());
}

#[test]
fn comments_are_allowed_in_every_state() {
    let queue = test_queue();
    let queued = enqueue(&queue, "/tmp/a", "q");
    let running = enqueue(&queue, "/tmp/a", "r");
    let done = enqueue(&queue, "/tmp/a", "d");
    let failed = enqueue(&queue, "/tmp/a", "f");
    let canceled = enqueue(&queue, "/tmp/a", "c");

    queue.jobs().cancel(&ctx(), queued.id).unwrap();
    queue.jobs().cancel(&ctx(), canceled.id).unwrap();
    let queued = enqueue(&queue, "/tmp/a", "q2");
    // running, done, failed are claimed in id order.
    queue.jobs().claim(&ctx(), "w").unwrap();
    queue.jobs().claim(&ctx(), "w").unwrap();
    queue.jobs().claim(&ctx(), "w").unwrap();
    queue
        .jobs()
        .complete(&ctx(), done.id, "test", "p", "No issues found.")
        .unwrap();
    queue.jobs().fail(&ctx(), failed.id, "boom").unwrap();

    for (job, status) in [
        (&queued, JobStatus::Queued),
        (&running, JobStatus::Running),
        (&done, JobStatus::Done),
        (&failed, JobStatus::Failed),
        (&canceled, JobStatus::Canceled),
    ] {
        assert_eq!(queue.jobs().get(job.id).unwrap().status, status);
        queue
            .reviews()
            .add_comment(&ctx(), job.id, "alice", "first")
            .unwrap();
        queue
            .reviews()
            .add_comment(&ctx(), job.id, "bob", "second")
            .unwrap();
        let comments = queue.reviews().comments(job.id).unwrap();
        let texts: Vec<(&str, &str)> = comments
            .iter()
            .map(|c| (c.responder.as_str(), c.text.as_str()))
            .collect();
        assert_eq!(texts, vec![("alice", "first"), ("bob", "second")]);
    }
}

#[test]
fn comment_on_unknown_job_is_not_found() {
    let queue = test_queue();
    assert!(matches!(
        queue
            .reviews()
            .add_comment(&ctx(), JobId::new(12), "alice", "hello"),
        Err(RqError::Job(JobError::NotFound))
    ));
    let job = enqueue(&queue, "/tmp/a", "111");
    assert!(matches!(
        queue.reviews().add_comment(&ctx(), job.id, "", "hello"),
        Err(RqError::Job(JobError::InvalidInput { .. }))
    ));
}

#[test]
fn batch_fetch_pairs_jobs_with_reviews() {
    let queue = test_queue();
    let pass = completed_job(&queue, "/tmp/batch", "pass111", "No issues found.\n\n## Verdict: PASS");
    let fail = completed_job(&queue, "/tmp/batch", "fail222", "- High — Critical bug found");
    let pending = enqueue(&queue, "/tmp/batch", "pend333");

    let mut wanted = ids(&[&pass, &fail, &pending]);
    wanted.push(JobId::new(9999));
    let results = queue.jobs().get_many_with_reviews(&wanted).unwrap();
    assert_eq!(results.len(), 3);

    let pass_result = &results[&pass.id];
    assert_eq!(pass_result.job.verdict, Some(Verdict::Pass));
    assert_eq!(
        pass_result.review.as_ref().and_then(|r| r.verdict_bool),
        Some(true)
    );
    let fail_result = &results[&fail.id];
    assert_eq!(fail_result.job.verdict, Some(Verdict::Fail));
    assert_eq!(
        fail_result.review.as_ref().and_then(|r| r.verdict_bool),
        Some(false)
    );
    assert!(results[&pending.id].review.is_none());

    assert!(queue.jobs().get_many_with_reviews(&[]).unwrap().is_empty());
    assert!(
        queue
            .jobs()
            .get_many_with_reviews(&[JobId::new(999), JobId::new(998)])
            .unwrap()
            .is_empty()
    );
}

#[test]
fn legacy_null_verdict_is_reparsed_on_read() {
    let queue = test_queue();
    let job = completed_job(&queue, "/tmp/legacy", "vread456", "No issues found.");
    queue
        .store()
        .connection()
        .execute(
            "UPDATE reviews SET verdict_bool = NULL WHERE job_id = ?1",
            [job.id.get()],
        )
        .unwrap();

    let detail = queue.reviews().by_job(job.id).unwrap();
    assert_eq!(detail.review.verdict_bool, None);
    assert_eq!(detail.review.verdict, Verdict::Pass);
    assert_eq!(detail.job.verdict, Some(Verdict::Pass));
}

#[test]
fn review_by_commit_sha_uses_newest_job() {
    let queue = test_queue();
    completed_job(&queue, "/tmp/sha", "shav123", "## Verdict: PASS");
    let newer = completed_job(&queue, "/tmp/sha", "shav123", "- High — Bug found");

    let detail = queue.reviews().by_commit_sha("shav123").unwrap();
    assert_eq!(detail.job.id, newer.id);
    assert_eq!(detail.review.verdict_bool, Some(false));
    assert_eq!(detail.job.verdict, Some(Verdict::Fail));
    assert!(matches!(
        queue.reviews().by_commit_sha("missing"),
        Err(RqError::Review(ReviewError::ReviewNotFound))
    ));
}

#[test]
fn backfill_stores_missing_verdicts_once() {
    let queue = test_queue();
    let pass = completed_job(&queue, "/tmp/bf", "a1", "No issues found.");
    let fail = completed_job(&queue, "/tmp/bf", "b2", "- Critical — data loss");
    queue
        .store()
        .connection()
        .execute_batch("UPDATE reviews SET verdict_bool = NULL")
        .unwrap();

    assert_eq!(queue.reviews().backfill_verdicts().unwrap(), 2);
    assert_eq!(queue.reviews().backfill_verdicts().unwrap(), 0);
    assert_eq!(
        queue.reviews().by_job(pass.id).unwrap().review.verdict_bool,
        Some(true)
    );
    assert_eq!(
        queue.reviews().by_job(fail.id).unwrap().review.verdict_bool,
        Some(false)
    );
}

#[test]
fn latest_for_commit_is_scoped_to_repo() {
    let queue = test_queue();
    let older = enqueue(&queue, "/tmp/one", "deadbeef");
    let newer = enqueue(&queue, "/tmp/one", "deadbeef");
    let other = enqueue(&queue, "/tmp/two", "deadbeef");

    let found = queue
        .jobs()
        .latest_for_commit(Path::new("/tmp/one"), "deadbeef")
        .unwrap()
        .unwrap();
    assert_eq!(found.id, newer.id);
    assert_ne!(found.id, older.id);
    assert_ne!(found.id, other.id);
    assert!(
        queue
            .jobs()
            .latest_for_commit(Path::new("/tmp/three"), "deadbeef")
            .unwrap()
            .is_none()
    );
}

#[test]
fn list_and_status_counts() {
    let queue = test_queue();
    enqueue(&queue, "/tmp/a", "1");
    enqueue(&queue, "/tmp/a", "2");
    let third = enqueue(&queue, "/tmp/b", "3");
    queue.jobs().cancel(&ctx(), third.id).unwrap();

    let queued = queue
        .jobs()
        .list(&JobFilter {
            status: Some(JobStatus::Queued),
            ..JobFilter::default()
        })
        .unwrap();
    assert_eq!(queued.len(), 2);
    assert!(queued[0].id > queued[1].id);

    let in_a = queue
        .jobs()
        .list(&JobFilter {
            repo_path: Some("/tmp/a".into()),
            limit: Some(1),
            ..JobFilter::default()
        })
        .unwrap();
    assert_eq!(in_a.len(), 1);

    let status = queue.jobs().status().unwrap();
    assert_eq!(status.count(JobStatus::Queued), 2);
    assert_eq!(status.count(JobStatus::Canceled), 1);
    assert_eq!(status.count(JobStatus::Done), 0);
}

#[tokio::test]
async fn events_are_published_after_commit() {
    let bus = rq_events::EventBus::new(8);
    let queue = rq_core::Queue::new(
        rq_db::DbStore::new(rq_db::schema::with_test_db().unwrap()),
        bus.clone(),
    );
    let mut events = bus.subscribe();
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().cancel(&ctx(), job.id).unwrap();

    let first = events.recv().await.unwrap();
    let second = events.recv().await.unwrap();
    assert_eq!(first.job_id, job.id.get());
    assert_eq!(first.kind, rq_events::JobEventKind::Enqueued);
    assert_eq!(second.kind, rq_events::JobEventKind::Canceled);
}

#[test]
fn request_cancel_stops_queued_jobs_at_once() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    let canceled = queue.jobs().request_cancel(&ctx(), job.id).unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(canceled.cancel_requested_at.is_none());
}

#[tokio::test]
async fn request_cancel_only_flags_a_running_job() {
    let bus = rq_events::EventBus::new(8);
    let queue = rq_core::Queue::new(
        rq_db::DbStore::new(rq_db::schema::with_test_db().unwrap()),
        bus.clone(),
    );
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().claim(&ctx(), "w1").unwrap();
    let mut events = bus.subscribe();

    let flagged = queue.jobs().request_cancel(&ctx(), job.id).unwrap();
    assert_eq!(flagged.status, JobStatus::Running);
    assert!(flagged.cancel_requested_at.is_some());
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, rq_events::JobEventKind::CancelRequested);

    // The owning worker writes the final status once it has stopped.
    let canceled = queue.jobs().cancel(&ctx(), job.id).unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert!(matches!(
        queue.jobs().request_cancel(&ctx(), job.id),
        Err(RqError::Job(JobError::NotFound))
    ));
    assert!(matches!(
        queue.jobs().request_cancel(&ctx(), JobId::new(404)),
        Err(RqError::Job(JobError::NotFound))
    ));
}

#[test]
fn completion_still_wins_after_a_cancel_request() {
    let queue = test_queue();
    let job = enqueue(&queue, "/tmp/a", "111");
    queue.jobs().claim(&ctx(), "w1").unwrap();
    queue.jobs().request_cancel(&ctx(), job.id).unwrap();

    let done = queue
        .jobs()
        .complete(&ctx(), job.id, "test", "prompt", "## Verdict: PASS")
        .unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert!(queue.jobs().cancel(&ctx(), job.id).unwrap_err().is_lost_race());
}
