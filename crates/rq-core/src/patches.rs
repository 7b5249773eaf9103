use crate::error::{PatchError, RqError};
use crate::jobs::JobRepository;
use crate::queue::{Queue, RequestContext, lost_race, require_job};
use crate::repos::RepoRepository;
use crate::store::Store;
use crate::types::{CommitMeta, JobId, JobStatus, NewJob, ReviewJob};
use crate::validation::validate_job_status_transition;
use chrono::Utc;
use rq_events::JobEventKind;
use rq_git::{GitBackend, GitError};

/// Moves finished fix jobs through `applied` and `rebased`.
pub struct PatchesApi<'a, S: Store> {
    core: &'a Queue<S>,
    git: &'a dyn GitBackend,
}

impl<'a, S: Store> PatchesApi<'a, S> {
    pub(crate) fn new(core: &'a Queue<S>, git: &'a dyn GitBackend) -> Self {
        Self { core, git }
    }

    /// Applies a fix job's patch to its repository and commits it.
    ///
    /// Refused with `StalePatch` when the job's ref no longer points at the
    /// commit the patch was built on; the working tree is left untouched.
    /// The commit holds only the patch's paths.
    pub fn apply(&self, ctx: &RequestContext, id: JobId) -> Result<ReviewJob, RqError> {
        let job = self.finished_fix_job(id, JobStatus::Applied)?;
        let (patch, base) = match (job.patch.as_deref(), job.patch_base_sha.as_deref()) {
            (Some(patch), Some(base)) if !patch.trim().is_empty() => (patch, base),
            _ => return Err(PatchError::NoPatch.into()),
        };

        let current = self.git.resolve_sha(&job.repo_path, &job.git_ref)?;
        if current != base {
            return Err(PatchError::StalePatch {
                base: base.to_string(),
                current,
            }
            .into());
        }
        self.git
            .check_patch(&job.repo_path, patch)
            .map_err(apply_failed)?;
        // Whatever the user already staged stays staged and out of the commit.
        let staged_before = self.git.staged_paths(&job.repo_path)?;
        self.git
            .apply_patch(&job.repo_path, patch)
            .map_err(apply_failed)?;
        let paths: Vec<String> = self
            .git
            .staged_paths(&job.repo_path)?
            .into_iter()
            .filter(|path| !staged_before.contains(path))
            .collect();
        let message = format!("Apply fix from job {id}");
        let head = self.git.commit_paths(&job.repo_path, &paths, &message)?;
        tracing::info!(job_id = %id, commit = %head, "applied fix patch");

        self.core.with_events(ctx, |store| {
            if !store.jobs().transition(
                id,
                &[JobStatus::Done],
                JobStatus::Applied,
                Utc::now(),
                None,
            )? {
                return Err(lost_race(id, JobStatus::Applied));
            }
            let job = require_job(store, id)?;
            Ok((job, vec![(id, JobEventKind::Applied)]))
        })
    }

    /// Queues a fresh fix job against the ref's current tip and retires this one.
    pub fn rerun(&self, ctx: &RequestContext, id: JobId) -> Result<ReviewJob, RqError> {
        let job = self.finished_fix_job(id, JobStatus::Rebased)?;
        let sha = self.git.resolve_sha(&job.repo_path, &job.git_ref)?;
        let info = self.git.commit_info(&job.repo_path, &sha)?;
        let meta = CommitMeta {
            sha: info.sha,
            author: info.author,
            subject: info.subject,
            timestamp: info.timestamp,
        };

        self.core.with_events(ctx, |store| {
            if !store.jobs().transition(
                id,
                &[JobStatus::Done],
                JobStatus::Rebased,
                Utc::now(),
                None,
            )? {
                return Err(lost_race(id, JobStatus::Rebased));
            }
            let commit = store.repos().get_or_create_commit(job.repo_id, &meta)?;
            let next = store.jobs().insert(
                NewJob {
                    repo_id: job.repo_id,
                    commit_id: Some(commit.id),
                    git_ref: job.git_ref.clone(),
                    parent_job_id: job.parent_job_id,
                    agent: job.agent.clone(),
                    model: job.model.clone(),
                    reasoning: job.reasoning.clone(),
                    options: job.options.clone(),
                    source_machine_id: job.source_machine_id.clone(),
                },
                Utc::now(),
            )?;
            let events = vec![
                (id, JobEventKind::Rebased),
                (next.id, JobEventKind::Enqueued),
            ];
            Ok((next, events))
        })
    }

    fn finished_fix_job(&self, id: JobId, to: JobStatus) -> Result<ReviewJob, RqError> {
        let job = require_job(self.core.store(), id)?;
        if !job.is_fix_job() {
            return Err(PatchError::NotAFixJob.into());
        }
        validate_job_status_transition(job.status, to)?;
        Ok(job)
    }
}

fn apply_failed(err: GitError) -> RqError {
    match err {
        GitError::PatchDoesNotApply { reason } => PatchError::ApplyFailed { reason }.into(),
        other => other.into(),
    }
}
