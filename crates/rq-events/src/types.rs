use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A job state change, published after the transaction that caused it commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: i64,
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
    pub source: EventSource,
    pub correlation_id: Option<String>,
}

impl JobEvent {
    pub fn new(job_id: i64, kind: JobEventKind, source: EventSource) -> Self {
        Self {
            job_id,
            kind,
            at: Utc::now(),
            source,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    Enqueued,
    Claimed { worker: String },
    Completed,
    Failed,
    CancelRequested,
    Canceled,
    Applied,
    Rebased,
    Commented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Api,
    Worker,
}
