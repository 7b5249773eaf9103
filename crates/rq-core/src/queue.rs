use crate::error::{JobError, ReviewError, RqError};
use crate::jobs::JobRepository;
use crate::patches::PatchesApi;
use crate::repos::RepoRepository;
use crate::reviews::ReviewRepository;
use crate::store::Store;
use crate::types::{
    EnqueueInput, JobFilter, JobId, JobStatus, JobWithReview, NewJob, NewReview, QueueStatus,
    Response, ReviewJob, ReviewWithJob,
};
use crate::validation::{allowed_sources, require_non_empty, validate_job_status_transition};
use chrono::Utc;
use rq_events::{EventBus, EventSource, JobEvent, JobEventKind};
use rq_git::GitBackend;
use std::collections::HashMap;
use std::path::Path;

pub type Events = Vec<(JobId, JobEventKind)>;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(source: EventSource, correlation_id: Option<String>) -> Self {
        Self {
            source,
            correlation_id,
        }
    }

    pub fn worker() -> Self {
        Self::new(EventSource::Worker, None)
    }
}

/// The job queue: the only component that changes job status.
pub struct Queue<S: Store> {
    store: S,
    event_bus: EventBus,
}

impl<S: Store> Queue<S> {
    pub fn new(store: S, event_bus: EventBus) -> Self {
        Self { store, event_bus }
    }

    pub fn jobs(&self) -> JobsApi<'_, S> {
        JobsApi { core: self }
    }

    pub fn reviews(&self) -> ReviewsApi<'_, S> {
        ReviewsApi { core: self }
    }

    pub fn patches<'a>(&'a self, git: &'a dyn GitBackend) -> PatchesApi<'a, S> {
        PatchesApi::new(self, git)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs `f` in a transaction and publishes its events once it commits.
    pub(crate) fn with_events<T, F>(&self, ctx: &RequestContext, f: F) -> Result<T, RqError>
    where
        F: FnOnce(&S) -> Result<(T, Events), RqError>,
    {
        let (value, events) = self.store.with_tx(f)?;
        for (job_id, kind) in events {
            let event = JobEvent::new(job_id.get(), kind, ctx.source)
                .with_correlation(ctx.correlation_id.clone());
            let _ = self.event_bus.publish(event);
        }
        Ok(value)
    }
}

pub(crate) fn require_job<S: Store>(store: &S, id: JobId) -> Result<ReviewJob, RqError> {
    store
        .jobs()
        .get(id)?
        .ok_or(RqError::Job(JobError::NotFound))
}

pub struct JobsApi<'a, S: Store> {
    core: &'a Queue<S>,
}

impl<S: Store> JobsApi<'_, S> {
    pub fn enqueue(&self, ctx: &RequestContext, input: EnqueueInput) -> Result<ReviewJob, RqError> {
        require_non_empty("git_ref", &input.git_ref)?;
        require_non_empty("agent", &input.agent)?;
        if input.repo_path.as_os_str().is_empty() {
            return Err(JobError::InvalidInput {
                message: "repo_path is required".to_string(),
            }
            .into());
        }
        let name = repo_display_name(&input.repo_path);

        self.core.with_events(ctx, |store| {
            let repo = store.repos().get_or_create(
                &input.repo_path,
                &name,
                input.source_machine_id.as_deref(),
            )?;
            let commit_id = match &input.commit {
                Some(meta) => Some(store.repos().get_or_create_commit(repo.id, meta)?.id),
                None => None,
            };
            if let Some(parent) = input.parent_job_id {
                require_job(store, parent)?;
            }
            let job = store.jobs().insert(
                NewJob {
                    repo_id: repo.id,
                    commit_id,
                    git_ref: input.git_ref.trim().to_string(),
                    parent_job_id: input.parent_job_id,
                    agent: input.agent.trim().to_string(),
                    model: input.model,
                    reasoning: input.reasoning,
                    options: input.options,
                    source_machine_id: input.source_machine_id,
                },
                Utc::now(),
            )?;
            let events = vec![(job.id, JobEventKind::Enqueued)];
            Ok((job, events))
        })
    }

    /// Hands the oldest queued job to `worker`, or `None` when the queue is empty.
    pub fn claim(&self, ctx: &RequestContext, worker: &str) -> Result<Option<ReviewJob>, RqError> {
        require_non_empty("worker", worker)?;
        self.core.with_events(ctx, |store| {
            let claimed = store.jobs().claim_next(worker, Utc::now())?;
            let events = claimed
                .iter()
                .map(|job| {
                    (
                        job.id,
                        JobEventKind::Claimed {
                            worker: worker.to_string(),
                        },
                    )
                })
                .collect();
            Ok((claimed, events))
        })
    }

    /// Stores the review and marks a running job `done`.
    pub fn complete(
        &self,
        ctx: &RequestContext,
        id: JobId,
        agent: &str,
        prompt: &str,
        output: &str,
    ) -> Result<ReviewJob, RqError> {
        self.finish_success(ctx, id, agent, prompt, output, None)
    }

    /// Like [`complete`](Self::complete), also recording the fix patch and its base.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_fix(
        &self,
        ctx: &RequestContext,
        id: JobId,
        agent: &str,
        prompt: &str,
        output: &str,
        patch: &str,
        base_sha: &str,
    ) -> Result<ReviewJob, RqError> {
        self.finish_success(ctx, id, agent, prompt, output, Some((patch, base_sha)))
    }

    fn finish_success(
        &self,
        ctx: &RequestContext,
        id: JobId,
        agent: &str,
        prompt: &str,
        output: &str,
        patch: Option<(&str, &str)>,
    ) -> Result<ReviewJob, RqError> {
        self.core.with_events(ctx, |store| {
            let current = require_job(store, id)?;
            validate_job_status_transition(current.status, JobStatus::Done)?;
            let now = Utc::now();
            if !store
                .jobs()
                .transition(id, &[JobStatus::Running], JobStatus::Done, now, None)?
            {
                return Err(lost_race(id, JobStatus::Done));
            }
            if let Some((patch, base_sha)) = patch {
                store.jobs().store_patch(id, patch, base_sha)?;
            }
            let verdict = store.verdict_parser().parse(output);
            store.reviews().insert(
                NewReview {
                    job_id: id,
                    agent: agent.to_string(),
                    prompt: prompt.to_string(),
                    output: output.to_string(),
                    verdict_bool: Some(verdict.is_pass()),
                },
                now,
            )?;
            let job = require_job(store, id)?;
            Ok((job, vec![(id, JobEventKind::Completed)]))
        })
    }

    pub fn fail(&self, ctx: &RequestContext, id: JobId, error: &str) -> Result<ReviewJob, RqError> {
        self.core.with_events(ctx, |store| {
            let current = require_job(store, id)?;
            validate_job_status_transition(current.status, JobStatus::Failed)?;
            if !store.jobs().transition(
                id,
                &[JobStatus::Running],
                JobStatus::Failed,
                Utc::now(),
                Some(error),
            )? {
                return Err(lost_race(id, JobStatus::Failed));
            }
            let job = require_job(store, id)?;
            Ok((job, vec![(id, JobEventKind::Failed)]))
        })
    }

    /// Asks for a job to stop. Terminal and unknown jobs are both `NotFound`.
    ///
    /// A queued job is canceled on the spot. A running job is only flagged and
    /// keeps its status; its worker tears down the run and then calls
    /// [`cancel`](Self::cancel).
    pub fn request_cancel(&self, ctx: &RequestContext, id: JobId) -> Result<ReviewJob, RqError> {
        self.core.with_events(ctx, |store| {
            let now = Utc::now();
            let kind = if store
                .jobs()
                .transition(id, &[JobStatus::Queued], JobStatus::Canceled, now, None)?
            {
                JobEventKind::Canceled
            } else if store.jobs().request_cancel(id, now)? {
                JobEventKind::CancelRequested
            } else {
                return Err(JobError::NotFound.into());
            };
            let job = require_job(store, id)?;
            Ok((job, vec![(id, kind)]))
        })
    }

    /// Marks a queued or running job `canceled`. Terminal and unknown jobs are
    /// both `NotFound`.
    pub fn cancel(&self, ctx: &RequestContext, id: JobId) -> Result<ReviewJob, RqError> {
        self.core.with_events(ctx, |store| {
            let sources = allowed_sources(JobStatus::Canceled);
            if !store
                .jobs()
                .transition(id, &sources, JobStatus::Canceled, Utc::now(), None)?
            {
                return Err(JobError::NotFound.into());
            }
            let job = require_job(store, id)?;
            Ok((job, vec![(id, JobEventKind::Canceled)]))
        })
    }

    pub fn get(&self, id: JobId) -> Result<ReviewJob, RqError> {
        require_job(self.core.store(), id)
    }

    pub fn get_with_review(&self, id: JobId) -> Result<JobWithReview, RqError> {
        let store = self.core.store();
        let job = require_job(store, id)?;
        let review = store.reviews().get_by_job(id)?;
        Ok(JobWithReview { job, review })
    }

    /// Existing jobs among `ids`, each paired with its review when it has one.
    pub fn get_many_with_reviews(
        &self,
        ids: &[JobId],
    ) -> Result<HashMap<JobId, JobWithReview>, RqError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let store = self.core.store();
        let jobs = store.jobs().get_many(ids)?;
        let mut reviews: HashMap<JobId, _> = store
            .reviews()
            .get_by_jobs(ids)?
            .into_iter()
            .map(|review| (review.job_id, review))
            .collect();
        Ok(jobs
            .into_iter()
            .map(|job| {
                let review = reviews.remove(&job.id);
                (job.id, JobWithReview { job, review })
            })
            .collect())
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<ReviewJob>, RqError> {
        Ok(self.core.store().jobs().list(filter)?)
    }

    /// Newest job for `sha` in the repo rooted at `repo_root`.
    pub fn latest_for_commit(
        &self,
        repo_root: &Path,
        sha: &str,
    ) -> Result<Option<ReviewJob>, RqError> {
        let store = self.core.store();
        let Some(repo) = store.repos().get_by_path(repo_root)? else {
            return Ok(None);
        };
        Ok(store.jobs().latest_for_commit(repo.id, sha)?)
    }

    pub fn status(&self) -> Result<QueueStatus, RqError> {
        let counts = self.core.store().jobs().counts()?;
        Ok(QueueStatus { counts, workers: 0 })
    }
}

pub struct ReviewsApi<'a, S: Store> {
    core: &'a Queue<S>,
}

impl<S: Store> ReviewsApi<'_, S> {
    pub fn by_job(&self, job_id: JobId) -> Result<ReviewWithJob, RqError> {
        let store = self.core.store();
        let job = require_job(store, job_id)?;
        let review = store
            .reviews()
            .get_by_job(job_id)?
            .ok_or(RqError::Review(ReviewError::ReviewNotFound))?;
        Ok(ReviewWithJob { review, job })
    }

    pub fn by_commit_sha(&self, sha: &str) -> Result<ReviewWithJob, RqError> {
        let store = self.core.store();
        let review = store
            .reviews()
            .latest_for_sha(sha.trim())?
            .ok_or(RqError::Review(ReviewError::ReviewNotFound))?;
        let job = require_job(store, review.job_id)?;
        Ok(ReviewWithJob { review, job })
    }

    /// Appends a comment; allowed whatever the job's status.
    pub fn add_comment(
        &self,
        ctx: &RequestContext,
        job_id: JobId,
        responder: &str,
        text: &str,
    ) -> Result<Response, RqError> {
        require_non_empty("responder", responder)?;
        require_non_empty("text", text)?;
        self.core.with_events(ctx, |store| {
            require_job(store, job_id)?;
            let response = store
                .reviews()
                .add_response(job_id, responder.trim(), text, Utc::now())?;
            Ok((response, vec![(job_id, JobEventKind::Commented)]))
        })
    }

    pub fn comments(&self, job_id: JobId) -> Result<Vec<Response>, RqError> {
        let store = self.core.store();
        require_job(store, job_id)?;
        Ok(store.reviews().list_responses(job_id)?)
    }

    /// Stores a verdict for every review written before verdicts were persisted.
    pub fn backfill_verdicts(&self) -> Result<usize, RqError> {
        self.core.store().with_tx(|store| {
            let missing = store.reviews().missing_verdicts()?;
            for (id, output) in &missing {
                let verdict = store.verdict_parser().parse(output);
                store.reviews().set_verdict(*id, verdict.is_pass())?;
            }
            Ok(missing.len())
        })
    }
}

pub(crate) fn repo_display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| path.display().to_string(), ToString::to_string)
}

pub(crate) fn lost_race(id: JobId, to: JobStatus) -> RqError {
    RqError::Job(JobError::Conflict {
        message: format!("job {id} changed state before it could become {to}"),
    })
}
