use crate::error::JobError;
use crate::types::{JobFilter, JobId, JobStatus, NewJob, RepoId, ReviewJob};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub trait JobRepository {
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<ReviewJob, JobError>;
    fn get(&self, id: JobId) -> Result<Option<ReviewJob>, JobError>;
    /// Jobs for every id that exists; unknown ids are skipped.
    fn get_many(&self, ids: &[JobId]) -> Result<Vec<ReviewJob>, JobError>;
    /// Newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<ReviewJob>, JobError>;
    fn latest_for_commit(&self, repo_id: RepoId, sha: &str)
    -> Result<Option<ReviewJob>, JobError>;
    /// Moves the oldest queued job to `running` with a single guarded update.
    fn claim_next(&self, worker: &str, now: DateTime<Utc>) -> Result<Option<ReviewJob>, JobError>;
    /// Sets `to` only while the job is in one of `from`; false when no row matched.
    ///
    /// Terminal targets stamp `finished_at`. `error` is recorded when given.
    fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        now: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool, JobError>;
    /// Flags a running job for cooperative cancellation; false unless it is running.
    fn request_cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, JobError>;
    fn store_patch(&self, id: JobId, patch: &str, base_sha: &str) -> Result<(), JobError>;
    fn counts(&self) -> Result<BTreeMap<JobStatus, u64>, JobError>;
}
