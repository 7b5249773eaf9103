use crate::types::enums::{JobStatus, Verdict};
use crate::types::ids::{CommitId, JobId, RepoId};
use crate::types::review::Review;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewJob {
    pub id: JobId,
    pub repo_id: RepoId,
    pub commit_id: Option<CommitId>,
    pub git_ref: String,
    pub parent_job_id: Option<JobId>,
    pub agent: String,
    pub model: Option<String>,
    pub reasoning: Option<String>,
    pub options: BTreeMap<String, String>,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub source_machine_id: Option<String>,
    pub error: Option<String>,
    /// Set when a cancel was requested while the job was running.
    #[serde(default)]
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub patch: Option<String>,
    pub patch_base_sha: Option<String>,
    pub repo_path: PathBuf,
    pub repo_name: String,
    pub commit_sha: Option<String>,
    pub commit_subject: Option<String>,
    pub verdict: Option<Verdict>,
}

impl ReviewJob {
    pub fn is_fix_job(&self) -> bool {
        self.parent_job_id.is_some()
    }

    /// SHA the job targets: the resolved commit when known, else the ref as given.
    pub fn target(&self) -> &str {
        self.commit_sha.as_deref().unwrap_or(&self.git_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWithReview {
    pub job: ReviewJob,
    pub review: Option<Review>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewWithJob {
    pub review: Review,
    pub job: ReviewJob,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub counts: BTreeMap<JobStatus, u64>,
    pub workers: usize,
}

impl QueueStatus {
    pub fn count(&self, status: JobStatus) -> u64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }
}
