//! HTTP client for the daemon's `/api` surface.

use reqwest::StatusCode;
use rq_core::types::{
    EnqueueRequest, JobId, JobWithReview, QueueStatus, Response, ReviewJob, ReviewWithJob,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon not reachable at {addr}: {message}")]
    Unreachable { addr: String, message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message} ({code}, HTTP {status})")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("invalid response from daemon: {message}")]
    Decode { message: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    addr: String,
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    /// Client for a daemon listening on `addr` (`host:port`).
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| ClientError::Unreachable {
                addr: addr.to_string(),
                message: err.to_string(),
            })?;
        Ok(Self {
            addr: addr.to_string(),
            base_url: format!("http://{addr}/api"),
            http,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn status(&self) -> Result<QueueStatus, ClientError> {
        self.get("/status", &[]).await
    }

    pub async fn enqueue(&self, request: &EnqueueRequest) -> Result<ReviewJob, ClientError> {
        self.post("/enqueue", request).await
    }

    pub async fn job(&self, id: JobId) -> Result<JobWithReview, ClientError> {
        self.get("/job", &[("id", id.to_string())]).await
    }

    /// Long-polls the daemon for up to `timeout`; returns the job as it stands then.
    pub async fn wait(&self, id: JobId, timeout: Duration) -> Result<JobWithReview, ClientError> {
        let request = self
            .http
            .get(format!("{}/job/wait", self.base_url))
            .query(&[
                ("job_id", id.to_string()),
                ("timeout_secs", timeout.as_secs().to_string()),
            ])
            .timeout(timeout + REQUEST_TIMEOUT);
        self.send(request).await
    }

    pub async fn latest_for_commit(
        &self,
        repo_root: &Path,
        sha: &str,
    ) -> Result<Option<ReviewJob>, ClientError> {
        let jobs: Vec<ReviewJob> = self
            .get(
                "/jobs",
                &[
                    ("repo", repo_root.to_string_lossy().to_string()),
                    ("sha", sha.to_string()),
                ],
            )
            .await?;
        Ok(jobs.into_iter().next())
    }

    pub async fn cancel(&self, id: JobId) -> Result<ReviewJob, ClientError> {
        self.post("/job/cancel", &json!({ "job_id": id })).await
    }

    pub async fn comment(
        &self,
        id: JobId,
        responder: &str,
        text: &str,
    ) -> Result<Response, ClientError> {
        self.post(
            "/comment",
            &json!({ "job_id": id, "responder": responder, "text": text }),
        )
        .await
    }

    pub async fn comments(&self, id: JobId) -> Result<Vec<Response>, ClientError> {
        self.get("/comments", &[("job_id", id.to_string())]).await
    }

    pub async fn review(&self, id: JobId) -> Result<ReviewWithJob, ClientError> {
        self.get("/review", &[("job_id", id.to_string())]).await
    }

    pub async fn apply(&self, id: JobId) -> Result<ReviewJob, ClientError> {
        self.post("/job/apply", &json!({ "job_id": id })).await
    }

    pub async fn rerun(&self, id: JobId) -> Result<ReviewJob, ClientError> {
        self.post("/job/rerun", &json!({ "job_id": id })).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let request = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .timeout(REQUEST_TIMEOUT);
        self.send(request).await
    }

    async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let request = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .timeout(REQUEST_TIMEOUT);
        self.send(request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request
            .send()
            .await
            .map_err(|err| ClientError::Unreachable {
                addr: self.addr.clone(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(|err| ClientError::Decode {
                message: err.to_string(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.code, parsed.message),
            Err(_) => ("http_error".to_string(), body),
        };
        tracing::debug!(status = status.as_u16(), %code, %message, "daemon returned an error");
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound { message });
        }
        Err(ClientError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_daemon_is_reported_with_its_address() {
        // Port 1 on loopback refuses connections.
        let client = DaemonClient::new("127.0.0.1:1").unwrap();
        let err = client.status().await.unwrap_err();
        assert!(matches!(err, ClientError::Unreachable { .. }));
        assert!(err.to_string().contains("127.0.0.1:1"));
    }
}
