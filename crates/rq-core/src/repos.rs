use crate::error::RepoError;
use crate::types::{Commit, CommitMeta, Repo, RepoId};
use std::path::Path;

pub trait RepoRepository {
    /// Returns the repo registered at `root_path`, creating it on first use.
    fn get_or_create(
        &self,
        root_path: &Path,
        name: &str,
        machine_id: Option<&str>,
    ) -> Result<Repo, RepoError>;
    fn get(&self, id: RepoId) -> Result<Option<Repo>, RepoError>;
    fn get_by_path(&self, root_path: &Path) -> Result<Option<Repo>, RepoError>;
    /// Returns the commit row for `meta.sha`, creating it on first use.
    fn get_or_create_commit(&self, repo_id: RepoId, meta: &CommitMeta) -> Result<Commit, RepoError>;
}
