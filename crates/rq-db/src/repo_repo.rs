use crate::util::{from_rfc3339, repo_storage, to_rfc3339};
use rq_core::error::RepoError;
use rq_core::repos::RepoRepository;
use rq_core::types::{Commit, CommitId, CommitMeta, Repo, RepoId};
use rusqlite::{Connection, Params, Row};
use std::path::{Path, PathBuf};

const REPO_COLUMNS: &str = "id, root_path, name, machine_id, created_at";
const COMMIT_COLUMNS: &str = "id, repo_id, sha, author, subject, timestamp";

pub struct RepoRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RepoRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_repo<P: Params>(&self, filter: &str, params: P) -> Result<Option<Repo>, RepoError> {
        let sql = format!("SELECT {REPO_COLUMNS} FROM repos WHERE {filter}");
        let mut stmt = self.conn.prepare(&sql).map_err(repo_storage)?;
        let mut rows = stmt.query(params).map_err(repo_storage)?;
        let Some(row) = rows.next().map_err(repo_storage)? else {
            return Ok(None);
        };
        map_repo_row(row).map(Some)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

impl RepoRepository for RepoRepo<'_> {
    fn get_or_create(
        &self,
        root_path: &Path,
        name: &str,
        machine_id: Option<&str>,
    ) -> Result<Repo, RepoError> {
        if name.trim().is_empty() {
            return Err(RepoError::InvalidInput {
                message: "repo name is required".to_string(),
            });
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO repos (root_path, name, machine_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                (
                    path_key(root_path),
                    name,
                    machine_id,
                    to_rfc3339(&chrono::Utc::now()),
                ),
            )
            .map_err(repo_storage)?;
        self.get_by_path(root_path)?.ok_or(RepoError::RepoNotFound)
    }

    fn get(&self, id: RepoId) -> Result<Option<Repo>, RepoError> {
        self.query_repo("id = ?1", [id.get()])
    }

    fn get_by_path(&self, root_path: &Path) -> Result<Option<Repo>, RepoError> {
        self.query_repo("root_path = ?1", [path_key(root_path)])
    }

    fn get_or_create_commit(&self, repo_id: RepoId, meta: &CommitMeta) -> Result<Commit, RepoError> {
        if meta.sha.trim().is_empty() {
            return Err(RepoError::InvalidInput {
                message: "commit sha is required".to_string(),
            });
        }
        self.conn
            .execute(
                "INSERT OR IGNORE INTO commits (repo_id, sha, author, subject, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    repo_id.get(),
                    &meta.sha,
                    &meta.author,
                    &meta.subject,
                    to_rfc3339(&meta.timestamp),
                ),
            )
            .map_err(repo_storage)?;
        let sql = format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE repo_id = ?1 AND sha = ?2");
        let mut stmt = self.conn.prepare(&sql).map_err(repo_storage)?;
        let mut rows = stmt
            .query((repo_id.get(), &meta.sha))
            .map_err(repo_storage)?;
        let Some(row) = rows.next().map_err(repo_storage)? else {
            return Err(RepoError::RepoNotFound);
        };
        map_commit_row(row)
    }
}

fn map_repo_row(row: &Row<'_>) -> Result<Repo, RepoError> {
    let root_path: String = row.get(1).map_err(repo_storage)?;
    let created_at: String = row.get(4).map_err(repo_storage)?;
    Ok(Repo {
        id: RepoId::new(row.get(0).map_err(repo_storage)?),
        root_path: PathBuf::from(root_path),
        name: row.get(2).map_err(repo_storage)?,
        machine_id: row.get(3).map_err(repo_storage)?,
        created_at: from_rfc3339(&created_at).map_err(repo_storage)?,
    })
}

fn map_commit_row(row: &Row<'_>) -> Result<Commit, RepoError> {
    let timestamp: String = row.get(5).map_err(repo_storage)?;
    Ok(Commit {
        id: CommitId::new(row.get(0).map_err(repo_storage)?),
        repo_id: RepoId::new(row.get(1).map_err(repo_storage)?),
        sha: row.get(2).map_err(repo_storage)?,
        author: row.get(3).map_err(repo_storage)?,
        subject: row.get(4).map_err(repo_storage)?,
        timestamp: from_rfc3339(&timestamp).map_err(repo_storage)?,
    })
}
