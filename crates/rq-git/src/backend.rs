use crate::worktree::Worktree;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub author: String,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {path}")]
    RepoNotFound { path: String },
    #[error("ref not found: {name}")]
    RefNotFound { name: String },
    #[error("patch does not apply: {reason}")]
    PatchDoesNotApply { reason: String },
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("backend error: {reason}")]
    BackendError { reason: String },
}

/// Git operations the job engine depends on.
///
/// Implementations must be usable from several worker tasks at once; every
/// call names the repository it operates on.
pub trait GitBackend: Send + Sync {
    /// Working tree root containing `path`.
    fn repo_root(&self, path: &Path) -> Result<PathBuf, GitError>;
    /// Root of the main working tree, even when `path` is inside a linked worktree.
    fn main_repo_root(&self, path: &Path) -> Result<PathBuf, GitError>;
    fn resolve_sha(&self, repo: &Path, rev: &str) -> Result<String, GitError>;
    fn commit_info(&self, repo: &Path, sha: &str) -> Result<CommitInfo, GitError>;
    /// Detached worktree checked out at `sha`, removed when the guard is dropped.
    fn create_worktree(&self, repo: &Path, sha: &str) -> Result<Worktree, GitError>;
    /// Every change in `worktree` relative to `base_sha`, untracked files included.
    fn capture_patch(&self, worktree: &Path, base_sha: &str) -> Result<String, GitError>;
    /// Paths whose index entry differs from `HEAD`.
    fn staged_paths(&self, repo: &Path) -> Result<Vec<String>, GitError>;
    /// Fails unless `patch` applies cleanly and none of its paths has staged changes.
    fn check_patch(&self, repo: &Path, patch: &str) -> Result<(), GitError>;
    /// Applies `patch` to the working tree and index of `repo`.
    fn apply_patch(&self, repo: &Path, patch: &str) -> Result<(), GitError>;
    /// Commits only `paths`, leaving anything else staged in place; returns the new SHA.
    fn commit_paths(&self, repo: &Path, paths: &[String], message: &str)
    -> Result<String, GitError>;
}
