use crate::types::ids::{CommitId, RepoId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: RepoId,
    pub root_path: PathBuf,
    pub name: String,
    pub machine_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub repo_id: RepoId,
    pub sha: String,
    pub author: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}
