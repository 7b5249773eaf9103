//! Worker pool: claims queued jobs and runs their agents.
//!
//! Each loop holds no database connection across an await; every queue call
//! opens its own connection, the same way HTTP handlers do.

use crate::{AppState, blocking, with_queue};
use rq_core::agent::{Agent, AgentRegistry, AgentRequest, build_prompt};
use rq_core::error::{AgentError, JobError};
use rq_core::types::ReviewJob;
use rq_core::types::enums::JobStatus;
use rq_core::types::ids::JobId;
use rq_core::{RequestContext, RqError};
use rq_events::{JobEvent, JobEventKind};
use rq_git::Worktree;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub struct WorkerPool {
    state: AppState,
    agents: Arc<AgentRegistry>,
    shutdown: CancellationToken,
}

/// What the agent produced for a job.
struct AgentOutput {
    prompt: String,
    output: String,
    patch: Option<(String, String)>,
}

enum Outcome {
    Finished(Result<AgentOutput, RqError>),
    Canceled,
    TimedOut,
    Shutdown,
}

impl WorkerPool {
    pub fn new(state: AppState, agents: Arc<AgentRegistry>, shutdown: CancellationToken) -> Self {
        Self {
            state,
            agents,
            shutdown,
        }
    }

    /// Starts `count` worker loops; they stop once the shutdown token fires.
    pub fn spawn(self, count: usize) -> JoinSet<()> {
        let mut set = JoinSet::new();
        for n in 0..count {
            let worker = Worker {
                name: format!("{}-worker-{n}", self.state.settings.machine_id),
                state: self.state.clone(),
                agents: Arc::clone(&self.agents),
                shutdown: self.shutdown.clone(),
            };
            set.spawn(worker.run());
        }
        set
    }
}

struct Worker {
    name: String,
    state: AppState,
    agents: Arc<AgentRegistry>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::info!(worker = %self.name, "worker started");
        let ctx = RequestContext::worker();
        let idle = self.state.settings.poll_interval();
        while !self.shutdown.is_cancelled() {
            match with_queue(&self.state, |queue| queue.jobs().claim(&ctx, &self.name)) {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(idle) => {}
                    }
                }
                Err(err) => {
                    tracing::warn!(worker = %self.name, error = %err, "claim failed");
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(idle) => {}
                    }
                }
            }
        }
        tracing::info!(worker = %self.name, "worker stopped");
    }

    async fn process(&self, job: ReviewJob) {
        tracing::info!(
            worker = %self.name,
            job_id = %job.id,
            agent = %job.agent,
            target = %job.target(),
            "job claimed"
        );
        let agent = match self.agents.get(&job.agent) {
            Ok(agent) => agent,
            Err(err) => {
                self.finish(&job, Outcome::Finished(Err(err.into())));
                return;
            }
        };

        // Subscribed before any work starts; requests that landed earlier are
        // caught by the status re-read.
        let mut events = self.state.event_bus.subscribe();
        let workspace = if job.is_fix_job() {
            match self.checkout(&job).await {
                Ok(workspace) => Some(workspace),
                Err(err) => {
                    self.finish(&job, Outcome::Finished(Err(err)));
                    return;
                }
            }
        } else {
            None
        };
        let workdir = workspace
            .as_ref()
            .map_or_else(|| job.repo_path.clone(), |(tree, _)| tree.path().to_path_buf());
        let base = workspace.as_ref().map(|(_, base)| base.clone());

        let timeout = self.state.settings.job_timeout();
        let mut outcome = tokio::select! {
            result = self.execute(agent.as_ref(), &job, workdir, base) => Outcome::Finished(result),
            () = cancel_event(&mut events, job.id) => Outcome::Canceled,
            () = self.cancel_observed(job.id) => Outcome::Canceled,
            () = self.shutdown.cancelled() => Outcome::Shutdown,
            () = tokio::time::sleep(timeout) => Outcome::TimedOut,
        };

        // The worktree is gone before any terminal status becomes visible.
        if let Some((worktree, _)) = workspace {
            let path = worktree.path().to_path_buf();
            if let Err(err) = blocking(move || worktree.remove().map_err(RqError::from)).await {
                tracing::warn!(
                    job_id = %job.id,
                    path = %path.display(),
                    error = %err,
                    "failed to remove worktree"
                );
                if matches!(outcome, Outcome::Finished(Ok(_))) {
                    outcome = Outcome::Finished(Err(err));
                }
            }
        }
        self.finish(&job, outcome);
    }

    /// Detached worktree at the fix job's target, plus the SHA it was checked out at.
    async fn checkout(&self, job: &ReviewJob) -> Result<(Worktree, String), RqError> {
        let git = Arc::clone(&self.state.git);
        let repo = job.repo_path.clone();
        let target = job.target().to_string();
        let (worktree, base) = blocking(move || {
            let base = git.resolve_sha(&repo, &target)?;
            let worktree = git.create_worktree(&repo, &base)?;
            Ok((worktree, base))
        })
        .await?;
        tracing::debug!(job_id = %job.id, path = %worktree.path().display(), "worktree created");
        Ok((worktree, base))
    }

    /// Runs the agent in `workdir`; with a `base`, also captures the diff it left there.
    async fn execute(
        &self,
        agent: &dyn Agent,
        job: &ReviewJob,
        workdir: PathBuf,
        base: Option<String>,
    ) -> Result<AgentOutput, RqError> {
        let prompt = build_prompt(job);
        let request = AgentRequest {
            prompt: prompt.clone(),
            workdir: workdir.clone(),
            model: job.model.clone(),
            reasoning: job.reasoning.clone(),
            options: job.options.clone(),
        };
        let output = agent.run(&request).await?;

        let patch = match base {
            Some(base) => {
                let git = Arc::clone(&self.state.git);
                Some(
                    blocking(move || {
                        let patch = git.capture_patch(&workdir, &base)?;
                        Ok((patch, base))
                    })
                    .await?,
                )
            }
            None => None,
        };
        Ok(AgentOutput {
            prompt,
            output,
            patch,
        })
    }

    /// Resolves once a cancel was requested for the job or it stopped running,
    /// including changes written by other processes.
    async fn cancel_observed(&self, id: JobId) {
        let tick = self.state.settings.poll_interval();
        loop {
            tokio::time::sleep(tick).await;
            match with_queue(&self.state, |queue| queue.jobs().get(id)) {
                Ok(job) if job.status != JobStatus::Running || job.cancel_requested_at.is_some() => {
                    return;
                }
                Err(err) if err.is_not_found() => return,
                _ => {}
            }
        }
    }

    fn finish(&self, job: &ReviewJob, outcome: Outcome) {
        let ctx = RequestContext::worker();
        let result = with_queue(&self.state, |queue| {
            let jobs = queue.jobs();
            match outcome {
                Outcome::Finished(Ok(done)) => match &done.patch {
                    Some((patch, base)) => jobs.complete_fix(
                        &ctx,
                        job.id,
                        &job.agent,
                        &done.prompt,
                        &done.output,
                        patch,
                        base,
                    ),
                    None => jobs.complete(&ctx, job.id, &job.agent, &done.prompt, &done.output),
                },
                Outcome::Finished(Err(err)) => jobs.fail(&ctx, job.id, &err.to_string()),
                Outcome::TimedOut => {
                    let err = AgentError::Timeout {
                        secs: self.state.settings.job_timeout_secs,
                    };
                    jobs.fail(&ctx, job.id, &err.to_string())
                }
                Outcome::Shutdown => jobs.fail(&ctx, job.id, "daemon shut down while job was running"),
                Outcome::Canceled => match jobs.cancel(&ctx, job.id) {
                    Err(RqError::Job(JobError::NotFound)) => jobs.get(job.id),
                    other => other,
                },
            }
        });

        match result {
            Ok(done) => tracing::info!(
                worker = %self.name,
                job_id = %job.id,
                status = %done.status,
                "job finished"
            ),
            Err(err) if err.is_lost_race() => tracing::debug!(
                worker = %self.name,
                job_id = %job.id,
                error = %err,
                "job already finished elsewhere"
            ),
            Err(err) => tracing::warn!(
                worker = %self.name,
                job_id = %job.id,
                error = %err,
                "failed to record job result"
            ),
        }
    }
}

async fn cancel_event(events: &mut broadcast::Receiver<JobEvent>, id: JobId) {
    loop {
        match events.recv().await {
            Ok(event)
                if event.job_id == id.get()
                    && matches!(
                        event.kind,
                        JobEventKind::CancelRequested | JobEventKind::Canceled
                    ) =>
            {
                return;
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
