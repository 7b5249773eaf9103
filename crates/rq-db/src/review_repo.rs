use crate::util::{from_rfc3339, placeholders, review_storage, to_rfc3339};
use chrono::{DateTime, Utc};
use rq_core::error::ReviewError;
use rq_core::reviews::ReviewRepository;
use rq_core::types::{JobId, NewReview, Response, ResponseId, Review, ReviewId, Verdict};
use rq_core::verdict::VerdictParser;
use rusqlite::{Connection, Params, Row, params_from_iter};

const REVIEW_COLUMNS: &str =
    "rv.id, rv.job_id, rv.agent, rv.prompt, rv.output, rv.verdict_bool, rv.created_at";

pub struct ReviewRepo<'a> {
    pub conn: &'a Connection,
    verdict: &'a VerdictParser,
}

impl<'a> ReviewRepo<'a> {
    pub fn new(conn: &'a Connection, verdict: &'a VerdictParser) -> Self {
        Self { conn, verdict }
    }

    fn query_reviews<P: Params>(&self, tail: &str, params: P) -> Result<Vec<Review>, ReviewError> {
        let sql = format!("SELECT {REVIEW_COLUMNS} FROM reviews rv {tail}");
        let mut stmt = self.conn.prepare(&sql).map_err(review_storage)?;
        let mut rows = stmt.query(params).map_err(review_storage)?;
        let mut reviews = Vec::new();
        while let Some(row) = rows.next().map_err(review_storage)? {
            reviews.push(map_review_row(row, self.verdict)?);
        }
        Ok(reviews)
    }
}

impl ReviewRepository for ReviewRepo<'_> {
    fn insert(&self, review: NewReview, now: DateTime<Utc>) -> Result<Review, ReviewError> {
        self.conn
            .execute(
                "INSERT INTO reviews (job_id, agent, prompt, output, verdict_bool, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    review.job_id.get(),
                    &review.agent,
                    &review.prompt,
                    &review.output,
                    review.verdict_bool,
                    to_rfc3339(&now),
                ),
            )
            .map_err(review_storage)?;
        let id = ReviewId::new(self.conn.last_insert_rowid());
        let verdict = review
            .verdict_bool
            .map_or_else(|| self.verdict.parse(&review.output), Verdict::from_pass);
        Ok(Review {
            id,
            job_id: review.job_id,
            agent: review.agent,
            prompt: review.prompt,
            output: review.output,
            verdict_bool: review.verdict_bool,
            verdict,
            created_at: now,
        })
    }

    fn get_by_job(&self, job_id: JobId) -> Result<Option<Review>, ReviewError> {
        Ok(self
            .query_reviews("WHERE rv.job_id = ?1", [job_id.get()])?
            .into_iter()
            .next())
    }

    fn get_by_jobs(&self, job_ids: &[JobId]) -> Result<Vec<Review>, ReviewError> {
        if job_ids.is_empty() {
            return Ok(Vec::new());
        }
        let tail = format!(
            "WHERE rv.job_id IN ({}) ORDER BY rv.job_id",
            placeholders(job_ids.len())
        );
        self.query_reviews(&tail, params_from_iter(job_ids.iter().map(|id| id.get())))
    }

    fn latest_for_sha(&self, sha: &str) -> Result<Option<Review>, ReviewError> {
        Ok(self
            .query_reviews(
                "JOIN review_jobs j ON j.id = rv.job_id \
                 LEFT JOIN commits c ON c.id = j.commit_id \
                 WHERE c.sha = ?1 OR (j.commit_id IS NULL AND j.git_ref = ?1) \
                 ORDER BY j.id DESC LIMIT 1",
                [sha],
            )?
            .into_iter()
            .next())
    }

    fn add_response(
        &self,
        job_id: JobId,
        responder: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Response, ReviewError> {
        self.conn
            .execute(
                "INSERT INTO responses (job_id, responder, response, created_at) VALUES (?1, ?2, ?3, ?4)",
                (job_id.get(), responder, text, to_rfc3339(&now)),
            )
            .map_err(review_storage)?;
        Ok(Response {
            id: ResponseId::new(self.conn.last_insert_rowid()),
            job_id,
            responder: responder.to_string(),
            text: text.to_string(),
            created_at: now,
        })
    }

    fn list_responses(&self, job_id: JobId) -> Result<Vec<Response>, ReviewError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, job_id, responder, response, created_at FROM responses WHERE job_id = ?1 ORDER BY id")
            .map_err(review_storage)?;
        let mut rows = stmt.query([job_id.get()]).map_err(review_storage)?;
        let mut responses = Vec::new();
        while let Some(row) = rows.next().map_err(review_storage)? {
            let created_at: String = row.get(4).map_err(review_storage)?;
            responses.push(Response {
                id: ResponseId::new(row.get(0).map_err(review_storage)?),
                job_id: JobId::new(row.get(1).map_err(review_storage)?),
                responder: row.get(2).map_err(review_storage)?,
                text: row.get(3).map_err(review_storage)?,
                created_at: from_rfc3339(&created_at).map_err(review_storage)?,
            });
        }
        Ok(responses)
    }

    fn missing_verdicts(&self) -> Result<Vec<(ReviewId, String)>, ReviewError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, output FROM reviews WHERE verdict_bool IS NULL ORDER BY id")
            .map_err(review_storage)?;
        let mut rows = stmt.query([]).map_err(review_storage)?;
        let mut missing = Vec::new();
        while let Some(row) = rows.next().map_err(review_storage)? {
            missing.push((
                ReviewId::new(row.get(0).map_err(review_storage)?),
                row.get(1).map_err(review_storage)?,
            ));
        }
        Ok(missing)
    }

    fn set_verdict(&self, id: ReviewId, pass: bool) -> Result<(), ReviewError> {
        self.conn
            .execute(
                "UPDATE reviews SET verdict_bool = ?1 WHERE id = ?2 AND verdict_bool IS NULL",
                (pass, id.get()),
            )
            .map_err(review_storage)?;
        Ok(())
    }
}

fn map_review_row(row: &Row<'_>, parser: &VerdictParser) -> Result<Review, ReviewError> {
    let output: String = row.get(4).map_err(review_storage)?;
    let verdict_bool: Option<bool> = row
        .get::<_, Option<i64>>(5)
        .map_err(review_storage)?
        .map(|value| value != 0);
    let created_at: String = row.get(6).map_err(review_storage)?;
    let verdict = verdict_bool.map_or_else(|| parser.parse(&output), Verdict::from_pass);
    Ok(Review {
        id: ReviewId::new(row.get(0).map_err(review_storage)?),
        job_id: JobId::new(row.get(1).map_err(review_storage)?),
        agent: row.get(2).map_err(review_storage)?,
        prompt: row.get(3).map_err(review_storage)?,
        output,
        verdict_bool,
        verdict,
        created_at: from_rfc3339(&created_at).map_err(review_storage)?,
    })
}
