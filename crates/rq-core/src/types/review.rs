use crate::types::enums::Verdict;
use crate::types::ids::{JobId, ResponseId, ReviewId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub job_id: JobId,
    pub agent: String,
    pub prompt: String,
    pub output: String,
    /// Stored verdict; `None` for rows written before verdicts were persisted.
    pub verdict_bool: Option<bool>,
    /// Stored verdict, or the output re-parsed when none is stored.
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

/// A comment attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: ResponseId,
    pub job_id: JobId,
    pub responder: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
