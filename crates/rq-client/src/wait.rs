//! `rq wait`: block until review jobs finish and turn their verdicts into an exit code.
//!
//! Arguments are validated locally before the daemon is contacted, so a bad
//! argument never has a side effect. Several jobs are waited on concurrently
//! and reported in argument order once all of them are done.

use crate::client::{ClientError, DaemonClient};
use async_trait::async_trait;
use rq_core::types::{JobId, JobStatus, JobWithReview, Verdict};
use rq_git::GitBackend;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

/// How long a single long-poll request may block on the daemon.
pub const LONG_POLL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct WaitArgs {
    pub args: Vec<String>,
    pub sha: Option<String>,
    pub force_job: bool,
    pub quiet: bool,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("cannot use both a positional argument and --sha")]
    ShaWithArgs,
    #[error("--job requires a job ID argument")]
    JobWithoutArgs,
    #[error("invalid job ID: {0}")]
    InvalidJobId(String),
    #[error("argument {0:?} is not a valid git ref or job ID")]
    InvalidArgument(String),
    #[error("invalid git ref: {0}")]
    InvalidRef(String),
}

/// A locally validated wait argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Job(JobId),
    Commit { reference: String, sha: String },
}

pub trait RefResolver {
    /// Full SHA for `reference` in the current repository, if it names a commit.
    fn resolve(&self, reference: &str) -> Option<String>;
}

/// Resolves refs in the repository containing `dir`.
pub struct GitRefs {
    git: Arc<dyn GitBackend>,
    dir: PathBuf,
}

impl GitRefs {
    pub fn new(git: Arc<dyn GitBackend>, dir: PathBuf) -> Self {
        Self { git, dir }
    }

    /// Root of the main working tree, which is where jobs are recorded.
    pub fn main_root(&self) -> Option<PathBuf> {
        self.git
            .main_repo_root(&self.dir)
            .or_else(|_| self.git.repo_root(&self.dir))
            .ok()
    }
}

impl RefResolver for GitRefs {
    fn resolve(&self, reference: &str) -> Option<String> {
        let root = self.git.repo_root(&self.dir).ok()?;
        self.git.resolve_sha(&root, reference).ok()
    }
}

#[async_trait]
pub trait JobSource: Send + Sync {
    /// Checks the daemon is up.
    async fn ping(&self) -> Result<(), ClientError>;
    async fn find_for_commit(&self, sha: &str) -> Result<Option<JobId>, ClientError>;
    /// Returns the job once terminal, or as it stands when the poll window ends.
    async fn poll(&self, id: JobId) -> Result<JobWithReview, ClientError>;
}

/// [`JobSource`] backed by the daemon, scoped to one repository.
pub struct DaemonJobs {
    client: DaemonClient,
    repo_root: Option<PathBuf>,
}

impl DaemonJobs {
    pub fn new(client: DaemonClient, repo_root: Option<PathBuf>) -> Self {
        Self { client, repo_root }
    }
}

#[async_trait]
impl JobSource for DaemonJobs {
    async fn ping(&self) -> Result<(), ClientError> {
        self.client.status().await.map(|_| ())
    }

    async fn find_for_commit(&self, sha: &str) -> Result<Option<JobId>, ClientError> {
        let Some(root) = &self.repo_root else {
            return Ok(None);
        };
        let job = self.client.latest_for_commit(root, sha).await?;
        Ok(job.map(|job| job.id))
    }

    async fn poll(&self, id: JobId) -> Result<JobWithReview, ClientError> {
        self.client.wait(id, LONG_POLL).await
    }
}

/// Final state of one waited-on job.
#[derive(Debug)]
pub enum Outcome {
    Passed(Box<JobWithReview>),
    Issues(Box<JobWithReview>),
    Unfinished(Box<JobWithReview>),
    NotFound,
    Error(ClientError),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed(_))
    }

    fn from_job(job: JobWithReview) -> Self {
        match job.job.status {
            JobStatus::Failed | JobStatus::Canceled => Self::Unfinished(Box::new(job)),
            _ => {
                let verdict = job
                    .job
                    .verdict
                    .or_else(|| job.review.as_ref().map(|review| review.verdict));
                if verdict == Some(Verdict::Pass) {
                    Self::Passed(Box::new(job))
                } else {
                    Self::Issues(Box::new(job))
                }
            }
        }
    }
}

pub fn resolve_targets(args: &WaitArgs, refs: &dyn RefResolver) -> Result<Vec<Target>, WaitError> {
    if args.sha.is_some() && !args.args.is_empty() {
        return Err(WaitError::ShaWithArgs);
    }
    if args.force_job && args.args.is_empty() {
        return Err(WaitError::JobWithoutArgs);
    }
    if args.args.is_empty() {
        let reference = args.sha.as_deref().unwrap_or("HEAD");
        let sha = refs
            .resolve(reference)
            .ok_or_else(|| WaitError::InvalidRef(reference.to_string()))?;
        return Ok(vec![Target::Commit {
            reference: reference.to_string(),
            sha,
        }]);
    }

    args.args
        .iter()
        .map(|arg| {
            if args.force_job {
                return arg
                    .parse()
                    .map(Target::Job)
                    .map_err(|_| WaitError::InvalidJobId(arg.clone()));
            }
            // Refs win so that all-digit SHAs are not mistaken for job ids.
            if let Some(sha) = refs.resolve(arg) {
                return Ok(Target::Commit {
                    reference: arg.clone(),
                    sha,
                });
            }
            arg.parse()
                .map(Target::Job)
                .map_err(|_| WaitError::InvalidArgument(arg.clone()))
        })
        .collect()
}

/// Runs the wait command and returns its exit code.
pub async fn run_wait<S>(
    args: &WaitArgs,
    refs: &dyn RefResolver,
    source: Arc<S>,
    out: &mut dyn Write,
) -> i32
where
    S: JobSource + 'static,
{
    let mut say = |line: String| {
        if !args.quiet {
            let _ = writeln!(out, "{line}");
        }
    };

    let targets = match resolve_targets(args, refs) {
        Ok(targets) => targets,
        Err(err) => {
            say(format!("Error: {err}"));
            return 1;
        }
    };
    if let Err(err) = source.ping().await {
        say(format!("Error: daemon not running: {err}"));
        return 1;
    }

    let work = wait_targets(targets, source, &mut say);
    match args.timeout {
        None => work.await,
        // Dropping `work` drops its JoinSet, which aborts every pending wait.
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(code) => code,
            Err(_) => {
                say(format!("Timed out after {}s", limit.as_secs()));
                1
            }
        },
    }
}

async fn wait_targets<S>(targets: Vec<Target>, source: Arc<S>, say: &mut dyn FnMut(String)) -> i32
where
    S: JobSource + 'static,
{
    let mut ids = Vec::with_capacity(targets.len());
    for target in targets {
        match target {
            Target::Job(id) => ids.push(id),
            Target::Commit { reference, sha } => match source.find_for_commit(&sha).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => {
                    say(format!("No job found for {reference}"));
                    return 1;
                }
                Err(err) => {
                    say(format!("Error: {err}"));
                    return 1;
                }
            },
        }
    }

    if let [id] = ids[..] {
        let outcome = wait_for_job(source.as_ref(), id).await;
        report_single(id, &outcome, say);
        return i32::from(!outcome.is_success());
    }

    let mut set = JoinSet::new();
    for (index, id) in ids.iter().copied().enumerate() {
        let source = Arc::clone(&source);
        set.spawn(async move { (index, wait_for_job(source.as_ref(), id).await) });
    }
    let mut outcomes: Vec<Option<Outcome>> = ids.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) => tracing::warn!(error = %err, "wait task ended abnormally"),
        }
    }

    let mut failed = false;
    for (id, outcome) in ids.iter().zip(outcomes) {
        match outcome {
            Some(outcome) => {
                failed |= !outcome.is_success();
                say(format!("Job {id}: {}", describe(&outcome)));
            }
            None => {
                failed = true;
                say(format!("Job {id}: wait did not finish"));
            }
        }
    }
    i32::from(failed)
}

/// Polls until the job reaches a terminal status.
pub async fn wait_for_job<S: JobSource + ?Sized>(source: &S, id: JobId) -> Outcome {
    loop {
        match source.poll(id).await {
            Ok(job) if job.job.status.is_terminal() => return Outcome::from_job(job),
            Ok(job) => tracing::debug!(job_id = %id, status = %job.job.status, "still waiting"),
            Err(err) if err.is_not_found() => return Outcome::NotFound,
            Err(err) => return Outcome::Error(err),
        }
    }
}

fn report_single(id: JobId, outcome: &Outcome, say: &mut dyn FnMut(String)) {
    match outcome {
        Outcome::Passed(job) | Outcome::Issues(job) => {
            if let Some(review) = &job.review {
                say(review.output.trim_end().to_string());
            }
            let label = if outcome.is_success() { "PASS" } else { "FAIL" };
            say(format!("Job {id}: {label}"));
        }
        Outcome::NotFound => say(format!("No job found for job {id}")),
        other => say(format!("Job {id}: {}", describe(other))),
    }
}

fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Passed(_) => "passed".to_string(),
        Outcome::Issues(_) => "review has issues".to_string(),
        Outcome::NotFound => "no job found".to_string(),
        Outcome::Unfinished(job) => match (&job.job.status, &job.job.error) {
            (JobStatus::Canceled, _) => "job was canceled".to_string(),
            (_, Some(error)) => format!("job failed: {error}"),
            (status, None) => format!("job ended as {status}"),
        },
        Outcome::Error(err) => err.to_string(),
    }
}
