use rq_client::wait::{DaemonJobs, GitRefs, WaitArgs, run_wait};
use rq_client::{ClientError, DaemonClient};
use rq_core::Settings;
use rq_core::agent::{AgentRegistry, TestAgent};
use rq_core::types::{EnqueueRequest, JobId, JobStatus};
use rq_git::testutil::TestRepo;
use rq_git::{GitBackend, GitCli};
use rq_serve::{AppState, run_daemon};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Daemon {
    client: DaemonClient,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
    _dir: TempDir,
}

impl Daemon {
    async fn start(output: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            db_path: dir.path().join("reviews.db"),
            poll_interval_ms: 20,
            max_workers: 2,
            ..Settings::default()
        };
        let state = AppState::new(settings, Arc::new(GitCli::new())).unwrap();
        let mut agents = AgentRegistry::new();
        agents.register(Arc::new(TestAgent::new(output)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_daemon(state, agents, listener, shutdown.clone()));
        Self {
            client: DaemonClient::new(&addr).unwrap(),
            shutdown,
            handle,
            _dir: dir,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

fn enqueue_request(repo: &TestRepo, git_ref: &str) -> EnqueueRequest {
    EnqueueRequest {
        repo_path: GitCli::new().main_repo_root(repo.path()).unwrap(),
        git_ref: git_ref.to_string(),
        ..EnqueueRequest::default()
    }
}

async fn wait_exit(daemon: &Daemon, repo: &TestRepo, args: WaitArgs) -> (i32, String) {
    let git: Arc<dyn GitBackend> = Arc::new(GitCli::new());
    let refs = GitRefs::new(git, repo.path().to_path_buf());
    let source = Arc::new(DaemonJobs::new(daemon.client.clone(), refs.main_root()));
    let mut out = Vec::new();
    let code = run_wait(&args, &refs, source, &mut out).await;
    (code, String::from_utf8(out).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wait_for_head_passes_after_review() {
    let repo = TestRepo::new();
    repo.write_file("a.txt", "one\n");
    let sha = repo.commit("first");
    let daemon = Daemon::start("Looks good.\n\n## Verdict: PASS").await;

    let job = daemon.client.enqueue(&enqueue_request(&repo, "HEAD")).await.unwrap();
    assert_eq!(job.commit_sha.as_deref(), Some(sha.as_str()));
    assert_eq!(job.commit_subject.as_deref(), Some("first"));

    let (code, out) = wait_exit(&daemon, &repo, WaitArgs::default()).await;
    assert_eq!(code, 0, "{out}");
    assert!(out.contains("Looks good."));

    let shown = daemon.client.job(job.id).await.unwrap();
    assert_eq!(shown.job.status, JobStatus::Done);
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_verdicts_and_multiple_jobs() {
    let repo = TestRepo::new();
    repo.write_file("a.txt", "one\n");
    repo.commit("first");
    let daemon = Daemon::start("- Medium: missing error handling").await;

    let first = daemon.client.enqueue(&enqueue_request(&repo, "HEAD")).await.unwrap();
    repo.write_file("a.txt", "two\n");
    repo.commit("second");
    let second = daemon.client.enqueue(&enqueue_request(&repo, "HEAD")).await.unwrap();

    let args = WaitArgs {
        args: vec![first.id.to_string(), second.id.to_string()],
        force_job: true,
        ..WaitArgs::default()
    };
    let (code, out) = wait_exit(&daemon, &repo, args).await;
    assert_eq!(code, 1);
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec![
            format!("Job {}: review has issues", first.id),
            format!("Job {}: review has issues", second.id),
        ]
    );
    daemon.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_and_comment_through_the_client() {
    let repo = TestRepo::new();
    repo.write_file("a.txt", "one\n");
    repo.commit("first");
    let daemon = Daemon::start("## Verdict: PASS").await;

    let err = daemon.client.cancel(JobId::new(4242)).await.unwrap_err();
    assert!(matches!(err, ClientError::NotFound { .. }));

    let job = daemon.client.enqueue(&enqueue_request(&repo, "HEAD")).await.unwrap();
    let done = daemon
        .client
        .wait(job.id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(done.job.status, JobStatus::Done);

    let err = daemon.client.cancel(job.id).await.unwrap_err();
    assert!(err.is_not_found());

    daemon.client.comment(job.id, "alice", "thanks").await.unwrap();
    let comments = daemon.client.comments(job.id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].text, "thanks");

    let review = daemon.client.review(job.id).await.unwrap();
    assert!(review.review.verdict.is_pass());
    daemon.stop().await;
}

#[tokio::test]
async fn wait_with_bad_argument_reports_before_contacting_daemon() {
    let repo = TestRepo::new();
    repo.write_file("a.txt", "one\n");
    repo.commit("first");
    let git: Arc<dyn GitBackend> = Arc::new(GitCli::new());
    let refs = GitRefs::new(git, repo.path().to_path_buf());
    // Nothing listens on this address; a bad argument must fail first anyway.
    let source = Arc::new(DaemonJobs::new(DaemonClient::new("127.0.0.1:1").unwrap(), None));

    let args = WaitArgs {
        args: vec!["not-a-ref".to_string()],
        ..WaitArgs::default()
    };
    let mut out = Vec::new();
    let code = run_wait(&args, &refs, Arc::clone(&source), &mut out).await;
    assert_eq!(code, 1);
    assert!(String::from_utf8(out).unwrap().contains("not a valid git ref"));

    let mut out = Vec::new();
    let code = run_wait(&WaitArgs::default(), &refs, source, &mut out).await;
    assert_eq!(code, 1);
    assert!(String::from_utf8(out).unwrap().contains("daemon not running"));
}
