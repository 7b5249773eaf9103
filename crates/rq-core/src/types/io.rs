use crate::types::enums::JobStatus;
use crate::types::ids::{CommitId, JobId, RepoId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Commit metadata supplied by the caller, stored the first time a job references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub sha: String,
    pub author: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueInput {
    pub repo_path: PathBuf,
    pub git_ref: String,
    pub commit: Option<CommitMeta>,
    pub agent: String,
    pub model: Option<String>,
    pub reasoning: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    pub parent_job_id: Option<JobId>,
    pub source_machine_id: Option<String>,
}

/// Body of an enqueue request sent to the daemon. Unset fields fall back to
/// the daemon's settings, and missing commit metadata is read from the repo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub repo_path: PathBuf,
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_machine_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub repo_id: RepoId,
    pub commit_id: Option<CommitId>,
    pub git_ref: String,
    pub parent_job_id: Option<JobId>,
    pub agent: String,
    pub model: Option<String>,
    pub reasoning: Option<String>,
    pub options: BTreeMap<String, String>,
    pub source_machine_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub job_id: JobId,
    pub agent: String,
    pub prompt: String,
    pub output: String,
    pub verdict_bool: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub repo_path: Option<PathBuf>,
    pub limit: Option<u32>,
}
