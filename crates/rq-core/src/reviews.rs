use crate::error::ReviewError;
use crate::types::{JobId, NewReview, Response, Review, ReviewId};
use chrono::{DateTime, Utc};

pub trait ReviewRepository {
    fn insert(&self, review: NewReview, now: DateTime<Utc>) -> Result<Review, ReviewError>;
    fn get_by_job(&self, job_id: JobId) -> Result<Option<Review>, ReviewError>;
    fn get_by_jobs(&self, job_ids: &[JobId]) -> Result<Vec<Review>, ReviewError>;
    /// Review of the newest completed job for a commit SHA.
    fn latest_for_sha(&self, sha: &str) -> Result<Option<Review>, ReviewError>;
    fn add_response(
        &self,
        job_id: JobId,
        responder: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Response, ReviewError>;
    /// Comments in insertion order.
    fn list_responses(&self, job_id: JobId) -> Result<Vec<Response>, ReviewError>;
    /// Reviews without a stored verdict, with their raw output.
    fn missing_verdicts(&self) -> Result<Vec<(ReviewId, String)>, ReviewError>;
    fn set_verdict(&self, id: ReviewId, pass: bool) -> Result<(), ReviewError>;
}
