use crate::util::{
    decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, from_rfc3339_opt,
    job_storage, placeholders, to_rfc3339,
};
use chrono::{DateTime, Utc};
use rq_core::error::JobError;
use rq_core::jobs::JobRepository;
use rq_core::types::{
    CommitId, JobFilter, JobId, JobStatus, NewJob, RepoId, ReviewJob, Verdict,
};
use rq_core::verdict::VerdictParser;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Params, Row, params_from_iter};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Job columns plus the repo, commit and verdict fields joined in for reads.
///
/// The review output is only selected when the stored verdict is missing.
const JOB_SELECT: &str = "SELECT j.id, j.repo_id, j.commit_id, j.git_ref, j.parent_job_id, \
     j.agent, j.model, j.reasoning, j.options, j.status, j.enqueued_at, j.started_at, \
     j.finished_at, j.claimed_by, j.source_machine_id, j.error, j.patch, j.patch_base_sha, \
     r.root_path, r.name, c.sha, c.subject, rv.verdict_bool, \
     CASE WHEN rv.id IS NOT NULL AND rv.verdict_bool IS NULL THEN rv.output END, \
     j.cancel_requested_at \
     FROM review_jobs j \
     JOIN repos r ON r.id = j.repo_id \
     LEFT JOIN commits c ON c.id = j.commit_id \
     LEFT JOIN reviews rv ON rv.job_id = j.id";

pub struct JobRepo<'a> {
    pub conn: &'a Connection,
    verdict: &'a VerdictParser,
}

impl<'a> JobRepo<'a> {
    pub fn new(conn: &'a Connection, verdict: &'a VerdictParser) -> Self {
        Self { conn, verdict }
    }

    fn query_jobs<P: Params>(&self, tail: &str, params: P) -> Result<Vec<ReviewJob>, JobError> {
        let sql = format!("{JOB_SELECT} {tail}");
        let mut stmt = self.conn.prepare(&sql).map_err(job_storage)?;
        let mut rows = stmt.query(params).map_err(job_storage)?;
        let mut jobs = Vec::new();
        while let Some(row) = rows.next().map_err(job_storage)? {
            jobs.push(map_job_row(row, self.verdict)?);
        }
        Ok(jobs)
    }
}

impl JobRepository for JobRepo<'_> {
    fn insert(&self, job: NewJob, now: DateTime<Utc>) -> Result<ReviewJob, JobError> {
        let options = encode_json(&job.options).map_err(|err| JobError::InvalidInput {
            message: err.to_string(),
        })?;
        self.conn
            .execute(
                "INSERT INTO review_jobs (repo_id, commit_id, git_ref, parent_job_id, agent, model, reasoning, options, status, enqueued_at, source_machine_id) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'queued', ?9, ?10)",
                rusqlite::params![
                    job.repo_id.get(),
                    job.commit_id.map(CommitId::get),
                    job.git_ref,
                    job.parent_job_id.map(JobId::get),
                    job.agent,
                    job.model,
                    job.reasoning,
                    options,
                    to_rfc3339(&now),
                    job.source_machine_id,
                ],
            )
            .map_err(job_storage)?;
        let id = JobId::new(self.conn.last_insert_rowid());
        self.get(id)?.ok_or(JobError::NotFound)
    }

    fn get(&self, id: JobId) -> Result<Option<ReviewJob>, JobError> {
        Ok(self
            .query_jobs("WHERE j.id = ?1", [id.get()])?
            .into_iter()
            .next())
    }

    fn get_many(&self, ids: &[JobId]) -> Result<Vec<ReviewJob>, JobError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tail = format!("WHERE j.id IN ({}) ORDER BY j.id", placeholders(ids.len()));
        self.query_jobs(&tail, params_from_iter(ids.iter().map(|id| id.get())))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<ReviewJob>, JobError> {
        let mut clauses = Vec::new();
        let mut params: Vec<Value> = Vec::new();
        if let Some(status) = filter.status {
            params.push(Value::Text(status.as_str().to_string()));
            clauses.push(format!("j.status = ?{}", params.len()));
        }
        if let Some(path) = &filter.repo_path {
            params.push(Value::Text(path.to_string_lossy().to_string()));
            clauses.push(format!("r.root_path = ?{}", params.len()));
        }
        let mut tail = String::new();
        if !clauses.is_empty() {
            tail.push_str("WHERE ");
            tail.push_str(&clauses.join(" AND "));
        }
        tail.push_str(" ORDER BY j.id DESC");
        if let Some(limit) = filter.limit {
            params.push(Value::Integer(i64::from(limit)));
            tail.push_str(&format!(" LIMIT ?{}", params.len()));
        }
        self.query_jobs(&tail, params_from_iter(params))
    }

    fn latest_for_commit(&self, repo_id: RepoId, sha: &str) -> Result<Option<ReviewJob>, JobError> {
        Ok(self
            .query_jobs(
                "WHERE j.repo_id = ?1 AND (c.sha = ?2 OR (j.commit_id IS NULL AND j.git_ref = ?2)) \
                 ORDER BY j.id DESC LIMIT 1",
                (repo_id.get(), sha),
            )?
            .into_iter()
            .next())
    }

    fn claim_next(&self, worker: &str, now: DateTime<Utc>) -> Result<Option<ReviewJob>, JobError> {
        let claimed: Option<i64> = self
            .conn
            .query_row(
                "UPDATE review_jobs SET status = 'running', started_at = ?1, claimed_by = ?2 \
                 WHERE id = (SELECT id FROM review_jobs WHERE status = 'queued' ORDER BY id LIMIT 1) \
                 AND status = 'queued' RETURNING id",
                (to_rfc3339(&now), worker),
                |row| row.get(0),
            )
            .optional()
            .map_err(job_storage)?;
        match claimed {
            Some(id) => self.get(JobId::new(id)),
            None => Ok(None),
        }
    }

    fn transition(
        &self,
        id: JobId,
        from: &[JobStatus],
        to: JobStatus,
        now: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<bool, JobError> {
        if from.is_empty() {
            return Ok(false);
        }
        let to_value = encode_enum(&to).map_err(job_storage)?;
        let mut params: Vec<Value> = vec![
            Value::Text(to_value),
            if to.is_terminal() {
                Value::Text(to_rfc3339(&now))
            } else {
                Value::Null
            },
            error.map_or(Value::Null, |text| Value::Text(text.to_string())),
            Value::Integer(id.get()),
        ];
        let first = params.len() + 1;
        for status in from {
            params.push(Value::Text(encode_enum(status).map_err(job_storage)?));
        }
        let list = (first..first + from.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE review_jobs SET status = ?1, finished_at = COALESCE(?2, finished_at), \
             error = COALESCE(?3, error) WHERE id = ?4 AND status IN ({list})"
        );
        let changed = self
            .conn
            .execute(&sql, params_from_iter(params))
            .map_err(job_storage)?;
        Ok(changed == 1)
    }

    fn request_cancel(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, JobError> {
        let changed = self
            .conn
            .execute(
                "UPDATE review_jobs SET cancel_requested_at = COALESCE(cancel_requested_at, ?1) \
                 WHERE id = ?2 AND status = 'running'",
                (to_rfc3339(&now), id.get()),
            )
            .map_err(job_storage)?;
        Ok(changed == 1)
    }

    fn store_patch(&self, id: JobId, patch: &str, base_sha: &str) -> Result<(), JobError> {
        let changed = self
            .conn
            .execute(
                "UPDATE review_jobs SET patch = ?1, patch_base_sha = ?2 WHERE id = ?3",
                (patch, base_sha, id.get()),
            )
            .map_err(job_storage)?;
        if changed == 0 {
            return Err(JobError::NotFound);
        }
        Ok(())
    }

    fn counts(&self) -> Result<BTreeMap<JobStatus, u64>, JobError> {
        let mut counts: BTreeMap<JobStatus, u64> =
            JobStatus::ALL.into_iter().map(|status| (status, 0)).collect();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM review_jobs GROUP BY status")
            .map_err(job_storage)?;
        let mut rows = stmt.query([]).map_err(job_storage)?;
        while let Some(row) = rows.next().map_err(job_storage)? {
            let status: String = row.get(0).map_err(job_storage)?;
            let count: i64 = row.get(1).map_err(job_storage)?;
            let status: JobStatus = decode_enum(&status).map_err(job_storage)?;
            counts.insert(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}

fn map_job_row(row: &Row<'_>, parser: &VerdictParser) -> Result<ReviewJob, JobError> {
    let options: String = row.get(8).map_err(job_storage)?;
    let status: String = row.get(9).map_err(job_storage)?;
    let enqueued_at: String = row.get(10).map_err(job_storage)?;
    let root_path: String = row.get(18).map_err(job_storage)?;
    let verdict_bool: Option<i64> = row.get(22).map_err(job_storage)?;
    let legacy_output: Option<String> = row.get(23).map_err(job_storage)?;
    let verdict = match (verdict_bool, legacy_output) {
        (Some(value), _) => Some(Verdict::from_pass(value != 0)),
        (None, Some(output)) => Some(parser.parse(&output)),
        (None, None) => None,
    };

    Ok(ReviewJob {
        id: JobId::new(row.get(0).map_err(job_storage)?),
        repo_id: RepoId::new(row.get(1).map_err(job_storage)?),
        commit_id: row
            .get::<_, Option<i64>>(2)
            .map_err(job_storage)?
            .map(CommitId::new),
        git_ref: row.get(3).map_err(job_storage)?,
        parent_job_id: row
            .get::<_, Option<i64>>(4)
            .map_err(job_storage)?
            .map(JobId::new),
        agent: row.get(5).map_err(job_storage)?,
        model: row.get(6).map_err(job_storage)?,
        reasoning: row.get(7).map_err(job_storage)?,
        options: decode_json(&options).map_err(job_storage)?,
        status: decode_enum(&status).map_err(job_storage)?,
        enqueued_at: from_rfc3339(&enqueued_at).map_err(job_storage)?,
        started_at: from_rfc3339_opt(row.get(11).map_err(job_storage)?).map_err(job_storage)?,
        finished_at: from_rfc3339_opt(row.get(12).map_err(job_storage)?).map_err(job_storage)?,
        claimed_by: row.get(13).map_err(job_storage)?,
        source_machine_id: row.get(14).map_err(job_storage)?,
        error: row.get(15).map_err(job_storage)?,
        cancel_requested_at: from_rfc3339_opt(row.get(24).map_err(job_storage)?)
            .map_err(job_storage)?,
        patch: row.get(16).map_err(job_storage)?,
        patch_base_sha: row.get(17).map_err(job_storage)?,
        repo_path: PathBuf::from(root_path),
        repo_name: row.get(19).map_err(job_storage)?,
        commit_sha: row.get(20).map_err(job_storage)?,
        commit_subject: row.get(21).map_err(job_storage)?,
        verdict,
    })
}
